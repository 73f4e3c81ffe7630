//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Unlike the operator, which resolves auth from Kubernetes Secrets, the
//! agent reads credentials from fixed files under `STOKER_CREDENTIALS_DIR`
//! — mounted there by the webhook collaborator out of scope for this
//! system. Fixed filesystem paths rather than environment variables, so
//! credential values never leak through the process environment.
//! App-identity auth resolves to the same on-disk shape as
//! declared token auth: the operator materializes the exchanged
//! installation token into a plain secret mounted as a `git-token` file,
//! so this module never performs its own JWT exchange.
//!
//! SPDX-License-Identifier: Apache-2.0

use git_client::{HostKeyPolicy, ResolvedAuth};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GIT_TOKEN_FILE: &str = "git-token";
const GIT_SSH_KEY_FILE: &str = "git-ssh-key";
const KNOWN_HOSTS_FILE: &str = "known-hosts-sha256";
const GATEWAY_API_KEY_FILE: &str = "gateway-api-key";

#[derive(Debug, Error)]
pub enum Error {
    #[error("auth type '{0}' requires credentials file '{1}' which is missing under the credentials dir")]
    MissingCredentialFile(String, String),
    #[error("io error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn read_trimmed(path: &Path) -> Result<String, std::io::Error> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

/// Resolves the metadata record's `authType` into a concrete `ResolvedAuth`
/// by reading the matching file. `none` requires no file; `ssh` and
/// `token`/`app` each read one plain-text file.
pub fn load_auth(credentials_dir: &Path, auth_type: &str) -> Result<ResolvedAuth, Error> {
    match auth_type {
        "none" => Ok(ResolvedAuth::None),
        "token" | "app" => {
            let path = credentials_dir.join(GIT_TOKEN_FILE);
            if !path.exists() {
                return Err(Error::MissingCredentialFile(auth_type.to_string(), GIT_TOKEN_FILE.to_string()));
            }
            let token = read_trimmed(&path).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
            Ok(ResolvedAuth::Token { token })
        }
        "ssh" => {
            let path = credentials_dir.join(GIT_SSH_KEY_FILE);
            if !path.exists() {
                return Err(Error::MissingCredentialFile(auth_type.to_string(), GIT_SSH_KEY_FILE.to_string()));
            }
            Ok(ResolvedAuth::Ssh { private_key_path: path, passphrase: None })
        }
        other => Err(Error::MissingCredentialFile(other.to_string(), GIT_TOKEN_FILE.to_string())),
    }
}

/// Mirrors `git_client::host_key_policy_from_secret`, sourced from a file
/// instead of a Secret value.
pub fn load_host_key_policy(credentials_dir: &Path) -> HostKeyPolicy {
    let path = credentials_dir.join(KNOWN_HOSTS_FILE);
    match read_trimmed(&path) {
        Ok(sha256) if !sha256.is_empty() => HostKeyPolicy::Enforced { known_hosts_sha256: sha256 },
        _ => HostKeyPolicy::Disabled,
    }
}

pub fn gateway_api_key_path(credentials_dir: &Path) -> PathBuf {
    credentials_dir.join(GATEWAY_API_KEY_FILE)
}

pub fn load_gateway_api_key(credentials_dir: &Path) -> Result<String, Error> {
    let path = gateway_api_key_path(credentials_dir);
    read_trimmed(&path).map_err(|source| Error::Io { path: path.display().to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_auth_needs_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let auth = load_auth(dir.path(), "none").unwrap();
        assert!(matches!(auth, ResolvedAuth::None));
    }

    #[test]
    fn missing_token_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_auth(dir.path(), "token").unwrap_err();
        assert!(matches!(err, Error::MissingCredentialFile(_, _)));
    }

    #[test]
    fn token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(GIT_TOKEN_FILE), "ghs_abc123\n").unwrap();
        let auth = load_auth(dir.path(), "token").unwrap();
        match auth {
            ResolvedAuth::Token { token } => assert_eq!(token, "ghs_abc123"),
            _ => panic!("expected Token variant"),
        }
    }

    #[test]
    fn app_auth_type_reads_same_file_as_token() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(GIT_TOKEN_FILE), "installation-token").unwrap();
        let auth = load_auth(dir.path(), "app").unwrap();
        assert!(matches!(auth, ResolvedAuth::Token { .. }));
    }

    #[test]
    fn absent_known_hosts_file_disables_verification() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_host_key_policy(dir.path()), HostKeyPolicy::Disabled));
    }
}
