//! Glob-based exclude/protected path matching against forward-slash
//! destination-relative paths. Grounded in the `globset` crate's `**`
//! recursive-wildcard support, which the `ignore`/`globset` combination in
//! `src/modules/sync_engine` already depends on transitively.

use crate::{Error, BUILTIN_EXCLUDE, PROTECTED_PATTERNS};
use globset::{Glob, GlobSet, GlobSetBuilder};

pub struct ExcludeSet {
    user: GlobSet,
    protected: GlobSet,
}

impl ExcludeSet {
    /// Builds the exclude set from the caller's patterns plus the hardcoded
    /// `**/.sync-staging/**` entry, deduplicated against caller input.
    pub fn build(user_patterns: &[String]) -> Result<Self, Error> {
        let mut patterns: Vec<&str> = user_patterns.iter().map(String::as_str).collect();
        if !patterns.contains(&BUILTIN_EXCLUDE) {
            patterns.push(BUILTIN_EXCLUDE);
        }

        let mut user_builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| Error::InvalidPattern(pattern.to_string(), e))?;
            user_builder.add(glob);
        }
        let user = user_builder
            .build()
            .map_err(|e| Error::InvalidPattern("<user set>".to_string(), e))?;

        let mut protected_builder = GlobSetBuilder::new();
        for pattern in PROTECTED_PATTERNS {
            protected_builder.add(Glob::new(pattern).expect("builtin protected pattern is valid"));
        }
        let protected = protected_builder
            .build()
            .expect("builtin protected set is valid");

        Ok(ExcludeSet { user, protected })
    }

    /// A path is excluded from copy/cleanup consideration if it matches a
    /// user exclude pattern OR a protected pattern. Protected paths are
    /// never writable via excludes; they are always excluded from both
    /// copy and cleanup regardless of what the caller configured.
    pub fn is_excluded(&self, dest_rel_path: &str) -> bool {
        self.user.is_match(dest_rel_path) || self.is_protected(dest_rel_path)
    }

    pub fn is_protected(&self, dest_rel_path: &str) -> bool {
        self.protected.is_match(dest_rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_resources_always_excluded() {
        let set = ExcludeSet::build(&[]).unwrap();
        assert!(set.is_excluded("data/.resources/existing"));
        assert!(set.is_excluded(".resources"));
        assert!(set.is_protected("config/.resources/x/y"));
    }

    #[test]
    fn builtin_staging_exclude_always_present() {
        let set = ExcludeSet::build(&[]).unwrap();
        assert!(set.is_excluded("anything/.sync-staging/tmp"));
    }

    #[test]
    fn user_recursive_wildcard() {
        let set = ExcludeSet::build(&["**/*.log".to_string()]).unwrap();
        assert!(set.is_excluded("logs/deep/nested/app.log"));
        assert!(!set.is_excluded("config/app.json"));
    }
}
