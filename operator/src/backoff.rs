//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Per-record exponential backoff state for the secret-existence and
//! ref-resolution gates: 30s, 60s, 120s, 240s, capped at 300s.
//!
//! SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const STEPS_SECONDS: [u64; 4] = [30, 60, 120, 240];
const CAP_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffState {
    failures: u32,
}

impl BackoffState {
    pub fn record_failure(&mut self) -> Duration {
        let delay = STEPS_SECONDS
            .get(self.failures as usize)
            .copied()
            .unwrap_or(CAP_SECONDS);
        self.failures = self.failures.saturating_add(1);
        Duration::from_secs(delay.min(CAP_SECONDS))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Keyed by `namespace/name`, shared across every reconcile worker.
#[derive(Default)]
pub struct BackoffMap {
    inner: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, key: &str) -> Duration {
        let mut guard = self.inner.lock().unwrap();
        guard.entry(key.to_string()).or_default().record_failure()
    }

    pub fn reset(&self, key: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.entry(key.to_string()).or_default().reset();
    }

    pub fn forget(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_fixed_steps_then_caps() {
        let mut state = BackoffState::default();
        assert_eq!(state.record_failure(), Duration::from_secs(30));
        assert_eq!(state.record_failure(), Duration::from_secs(60));
        assert_eq!(state.record_failure(), Duration::from_secs(120));
        assert_eq!(state.record_failure(), Duration::from_secs(240));
        assert_eq!(state.record_failure(), Duration::from_secs(300));
        assert_eq!(state.record_failure(), Duration::from_secs(300));
    }

    #[test]
    fn reset_returns_to_first_step() {
        let mut state = BackoffState::default();
        state.record_failure();
        state.record_failure();
        state.reset();
        assert_eq!(state.record_failure(), Duration::from_secs(30));
    }
}
