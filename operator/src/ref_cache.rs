//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Caches the last successful `LsRemote` result per record so a revolution
//! that sees the same declared ref within the polling interval skips the
//! remote round-trip entirely.
//!
//! SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CachedResolution {
    requested_ref: String,
    commit: String,
    resolved_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RefCache {
    inner: Mutex<HashMap<String, CachedResolution>>,
}

impl RefCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached commit when `requested_ref` matches what was last
    /// resolved and the cache entry is younger than `polling_interval`.
    pub fn lookup(&self, key: &str, requested_ref: &str, polling_interval: Duration) -> Option<String> {
        let guard = self.inner.lock().unwrap();
        let cached = guard.get(key)?;
        if cached.requested_ref != requested_ref {
            return None;
        }
        let age = Utc::now() - cached.resolved_at;
        if age.to_std().ok()? < polling_interval {
            Some(cached.commit.clone())
        } else {
            None
        }
    }

    pub fn store(&self, key: &str, requested_ref: &str, commit: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(
            key.to_string(),
            CachedResolution {
                requested_ref: requested_ref.to_string(),
                commit: commit.to_string(),
                resolved_at: Utc::now(),
            },
        );
    }

    pub fn forget(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_cache_entry_is_not_reused() {
        let cache = RefCache::new();
        cache.store("ns/name", "main", "abc123");
        assert_eq!(
            cache.lookup("ns/name", "main", Duration::from_secs(3600)),
            Some("abc123".to_string())
        );
        assert_eq!(cache.lookup("ns/name", "main", Duration::from_millis(0)), None);
    }

    #[test]
    fn different_requested_ref_misses_cache() {
        let cache = RefCache::new();
        cache.store("ns/name", "main", "abc123");
        assert_eq!(cache.lookup("ns/name", "release-1", Duration::from_secs(3600)), None);
    }
}
