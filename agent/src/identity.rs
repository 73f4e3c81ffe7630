//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! The agent's view of itself: identity fixed at injection time via
//! environment variables, plus the mutable bits (profile selection,
//! ref-override) the webhook projects into a downward-API file so the
//! agent can reread them without restarting. An env-var bootstrap for
//! the fixed fields, widened with a rereadable file the way a projected
//! `ConfigMap`/`DownwardAPI` volume works.
//!
//! SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_ANNOTATIONS_PATH: &str = "/var/run/stoker/annotations";
const DEFAULT_CREDENTIALS_DIR: &str = "/var/run/stoker/credentials";
const DEFAULT_WORK_DIR: &str = "/var/run/stoker/workdir";
const DEFAULT_LIVE_DIR: &str = "/data";
const DEFAULT_READINESS_ADDR: &str = "0.0.0.0:8081";

const ANNOTATION_PROFILE: &str = "sync.stoker.io/profile";
const ANNOTATION_REF_OVERRIDE: &str = "sync.stoker.io/ref-override";

#[derive(Debug, Error)]
pub enum Error {
    #[error("required environment variable '{0}' is not set")]
    MissingEnv(&'static str),
}

/// Fixed at pod injection time; never changes for the lifetime of the
/// process.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub pod_name: String,
    pub namespace: String,
    pub gatewaysync_name: String,
    pub gateway_name: String,
    pub annotations_path: PathBuf,
    pub credentials_dir: PathBuf,
    pub work_dir: PathBuf,
    pub live_dir: PathBuf,
    pub readiness_addr: String,
}

impl AgentIdentity {
    /// Reads the four fixed identity fields from environment: pod name,
    /// namespace, cr-name, gateway name are plain strings injected by the
    /// webhook, never read from a file.
    pub fn from_env() -> Result<Self, Error> {
        Ok(AgentIdentity {
            pod_name: require_env("STOKER_POD_NAME")?,
            namespace: require_env("STOKER_POD_NAMESPACE")?,
            gatewaysync_name: require_env("STOKER_CR_NAME")?,
            gateway_name: require_env("STOKER_GATEWAY_NAME")?,
            annotations_path: std::env::var("STOKER_ANNOTATIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ANNOTATIONS_PATH)),
            credentials_dir: std::env::var("STOKER_CREDENTIALS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CREDENTIALS_DIR)),
            work_dir: std::env::var("STOKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORK_DIR)),
            live_dir: std::env::var("STOKER_LIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LIVE_DIR)),
            readiness_addr: std::env::var("STOKER_READINESS_ADDR")
                .unwrap_or_else(|_| DEFAULT_READINESS_ADDR.to_string()),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::MissingEnv(name))
}

/// The live subset of state the agent rereads from the projected
/// annotations file before every sync, so profile or ref-override changes
/// take effect without a pod restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSelectors {
    pub profile: Option<String>,
    pub ref_override: Option<String>,
}

/// Parses the projected annotations file. The file format is one
/// `key=value` pair per line, the shape the Kubernetes `downwardAPI`
/// volume writes for `fieldRef`/`resourceFieldRef` projections. A missing
/// file (not yet projected, or sidecar started before the projection is
/// ready) is treated as "no overrides yet", not an error.
pub fn read_live_selectors(path: &std::path::Path) -> LiveSelectors {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return LiveSelectors::default(),
    };

    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim(), value.trim().trim_matches('"'));
        }
    }

    LiveSelectors {
        profile: fields.get(ANNOTATION_PROFILE).map(|v| v.to_string()),
        ref_override: fields.get(ANNOTATION_REF_OVERRIDE).map(|v| v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_annotations_file_yields_empty_selectors() {
        let selectors = read_live_selectors(std::path::Path::new("/nonexistent/path/for/test"));
        assert_eq!(selectors, LiveSelectors::default());
    }

    #[test]
    fn parses_quoted_downward_api_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sync.stoker.io/profile=\"line1\"").unwrap();
        writeln!(file, "sync.stoker.io/ref-override=\"v1.2.3\"").unwrap();
        writeln!(file, "sync.stoker.io/inject=\"true\"").unwrap();

        let selectors = read_live_selectors(file.path());
        assert_eq!(selectors.profile, Some("line1".to_string()));
        assert_eq!(selectors.ref_override, Some("v1.2.3".to_string()));
    }
}
