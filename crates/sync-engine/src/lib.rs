//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Generic staging-then-merge file synchronization engine. Knows nothing
//! about Git, Kubernetes, or the gateway process: given an ordered mapping
//! plan, it makes the live directory match.
//!
//! SPDX-License-Identifier: Apache-2.0

mod engine;
mod exclude;

pub use engine::{execute, Outcome};
pub use exclude::ExcludeSet;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Two patterns are hard-protected: never written, deleted, or descended
/// into, regardless of user-supplied excludes.
pub const PROTECTED_PATTERNS: &[&str] = &["**/.resources/**", "**/.resources"];

/// Always merged into the user's excludes, deduplicated.
pub const BUILTIN_EXCLUDE: &str = "**/.sync-staging/**";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    Dir,
    File,
}

/// A single `(source, destination, type)` triple with every template
/// already resolved to a concrete path.
#[derive(Debug, Clone)]
pub struct ResolvedMapping {
    pub source_abs: PathBuf,
    pub dest_rel: String,
    pub kind: MappingKind,
    pub required: bool,
}

/// The complete instruction set for one sync revolution.
#[derive(Debug, Clone)]
pub struct Plan {
    pub mappings: Vec<ResolvedMapping>,
    pub excludes: Vec<String>,
    pub staging_dir: PathBuf,
    pub live_dir: PathBuf,
    pub dry_run: bool,
}

/// Result of an applied (non-dry-run) sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub projects_synced: u64,
    pub duration: Duration,
    pub errors: Vec<String>,
}

/// Result of a dry-run sync: the path-set diff against live, unmutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DryRunDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("required mapping source '{0}' does not exist")]
    RequiredSourceMissing(String),
    #[error("io error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid exclude pattern '{0}': {1}")]
    InvalidPattern(String, globset::Error),
}
