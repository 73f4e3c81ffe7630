//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! `LsRemote` and `CloneOrFetch` against a pinned commit, backed by `git2`
//! the same way `src/modules/sync_engine/src/sync.rs` drives its own
//! commit-graph analysis and push operations — opening repositories and
//! remotes directly rather than shelling out to the `git` binary.
//!
//! SPDX-License-Identifier: Apache-2.0

mod auth;

pub use auth::{apply_host_key_policy, AppTokenCache, HostKeyPolicy, ResolvedAuth};

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);
const CLONE_OR_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum Error {
    #[error("git operation timed out")]
    Timeout,
    #[error("git2 error: {0}")]
    Git(#[from] git2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ref '{0}' not found on remote")]
    RefNotFound(String),
    #[error("blocking task join error: {0}")]
    Join(String),
    #[error("GitHub App token exchange failed: {0}")]
    AppExchange(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefResolution {
    pub commit: String,
    pub git_ref: String,
}

/// Single round-trip returning the commit SHA `git_ref` currently points
/// to on the remote. No objects are downloaded. If `git_ref` is already a
/// full 40-character hex SHA, it is returned as-is without contacting the
/// remote, since there is no ref to list it against.
#[instrument(skip(auth, host_key_policy), fields(repo = %repo_url, git_ref = %git_ref))]
pub async fn ls_remote(
    repo_url: &str,
    git_ref: &str,
    auth: ResolvedAuth,
    host_key_policy: HostKeyPolicy,
) -> Result<RefResolution, Error> {
    if is_full_sha(git_ref) {
        return Ok(RefResolution { commit: git_ref.to_string(), git_ref: git_ref.to_string() });
    }

    let repo_url = repo_url.to_string();
    let git_ref = git_ref.to_string();

    let work = tokio::task::spawn_blocking(move || ls_remote_blocking(&repo_url, &git_ref, auth, host_key_policy));

    match tokio::time::timeout(LS_REMOTE_TIMEOUT, work).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::Join(join_err.to_string())),
        Err(_) => Err(Error::Timeout),
    }
}

fn ls_remote_blocking(
    repo_url: &str,
    git_ref: &str,
    auth: ResolvedAuth,
    host_key_policy: HostKeyPolicy,
) -> Result<RefResolution, Error> {
    let mut remote = git2::Remote::create_detached(repo_url)?;
    let mut callbacks = git2::RemoteCallbacks::new();
    auth.apply_credentials(&mut callbacks);
    apply_host_key_policy(&host_key_policy, &mut callbacks);

    let connection = remote.connect_auth(git2::Direction::Fetch, Some(callbacks), None)?;
    let heads = connection.list()?;

    let candidates = [
        format!("refs/heads/{git_ref}"),
        format!("refs/tags/{git_ref}"),
        git_ref.to_string(),
    ];

    for candidate in &candidates {
        if let Some(head) = heads.iter().find(|h| h.name() == candidate) {
            return Ok(RefResolution {
                commit: head.oid().to_string(),
                git_ref: git_ref.to_string(),
            });
        }
    }

    Err(Error::RefNotFound(git_ref.to_string()))
}

fn is_full_sha(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Ensures `work_dir` is a checkout pinned exactly at `commit`. On first
/// call this initializes a repository and fetches depth 1; subsequent
/// calls with a different commit fetch only what's needed and check out.
#[instrument(skip(auth, host_key_policy), fields(repo = %repo_url, commit = %commit))]
pub async fn clone_or_fetch(
    repo_url: &str,
    commit: &str,
    work_dir: &Path,
    auth: ResolvedAuth,
    host_key_policy: HostKeyPolicy,
) -> Result<(), Error> {
    let repo_url = repo_url.to_string();
    let commit = commit.to_string();
    let work_dir = work_dir.to_path_buf();

    let work = tokio::task::spawn_blocking(move || {
        clone_or_fetch_blocking(&repo_url, &commit, &work_dir, auth, host_key_policy)
    });

    match tokio::time::timeout(CLONE_OR_FETCH_TIMEOUT, work).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::Join(join_err.to_string())),
        Err(_) => Err(Error::Timeout),
    }
}

fn clone_or_fetch_blocking(
    repo_url: &str,
    commit: &str,
    work_dir: &Path,
    auth: ResolvedAuth,
    host_key_policy: HostKeyPolicy,
) -> Result<(), Error> {
    let first_checkout = !work_dir.join(".git").exists();
    if first_checkout {
        std::fs::create_dir_all(work_dir)?;
    }

    let repo = if first_checkout {
        git2::Repository::init(work_dir)?
    } else {
        git2::Repository::open(work_dir)?
    };

    let mut remote = match repo.find_remote("origin") {
        Ok(r) => r,
        Err(_) => repo.remote("origin", repo_url)?,
    };

    let mut callbacks = git2::RemoteCallbacks::new();
    auth.apply_credentials(&mut callbacks);
    apply_host_key_policy(&host_key_policy, &mut callbacks);

    let mut fetch_opts = git2::FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);
    fetch_opts.depth(1);

    debug!(first_checkout, "fetching pinned commit");
    remote.fetch(&[commit], Some(&mut fetch_opts), None)?;

    let oid = git2::Oid::from_str(commit)?;
    repo.find_commit(oid)?;
    repo.set_head_detached(oid)?;

    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_head(Some(&mut checkout))?;

    Ok(())
}

/// Resolves the declared auth descriptor plus the namespace's secret
/// contents into a concrete `ResolvedAuth`. A pure function: no network
/// calls for `ssh`/`token`; app-identity auth performs a token exchange via
/// `AppTokenCache`, caller-provided so the cache outlives one resolution.
pub async fn resolve_auth(
    descriptor: &gatewaysync_api::AuthDescriptor,
    secret_lookup: impl Fn(&str, Option<&str>) -> Option<String>,
    token_cache: &AppTokenCache,
) -> Result<ResolvedAuth, Error> {
    use gatewaysync_api::AuthDescriptor;

    match descriptor {
        AuthDescriptor::None => Ok(ResolvedAuth::None),
        AuthDescriptor::Token { secret_ref } => {
            let token = secret_lookup(&secret_ref.name, secret_ref.key.as_deref())
                .ok_or_else(|| Error::AppExchange(format!("secret '{}' missing token key", secret_ref.name)))?;
            Ok(ResolvedAuth::Token { token })
        }
        AuthDescriptor::Ssh { secret_ref } => {
            let key_contents = secret_lookup(&secret_ref.name, secret_ref.key.as_deref())
                .ok_or_else(|| Error::AppExchange(format!("secret '{}' missing ssh key", secret_ref.name)))?;
            let path = materialize_ssh_key(&secret_ref.name, &key_contents)?;
            Ok(ResolvedAuth::Ssh { private_key_path: path, passphrase: None })
        }
        AuthDescriptor::App { secret_ref, app_id, installation_id } => {
            let pem = secret_lookup(&secret_ref.name, secret_ref.key.as_deref())
                .ok_or_else(|| Error::AppExchange(format!("secret '{}' missing app private key", secret_ref.name)))?;
            let token = token_cache.get_or_refresh(*app_id, *installation_id, &pem).await?;
            Ok(ResolvedAuth::Token { token })
        }
    }
}

fn materialize_ssh_key(secret_name: &str, contents: &str) -> Result<PathBuf, Error> {
    let dir = std::env::temp_dir().join("stoker-ssh-keys");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{secret_name}.pem"));
    std::fs::write(&path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

/// Derives the host-key policy from an optional known-hosts secret value.
/// Absence means verification is disabled — a warning condition, not a gate.
pub fn host_key_policy_from_secret(known_hosts_sha256: Option<String>) -> HostKeyPolicy {
    match known_hosts_sha256 {
        Some(sha256) => {
            if sha256.is_empty() {
                warn!("known-hosts secret present but empty, disabling host key verification");
                HostKeyPolicy::Disabled
            } else {
                HostKeyPolicy::Enforced { known_hosts_sha256: sha256 }
            }
        }
        None => HostKeyPolicy::Disabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sha_detection() {
        assert!(is_full_sha(&"a".repeat(40)));
        assert!(!is_full_sha(&"a".repeat(39)));
        assert!(!is_full_sha("main"));
        assert!(!is_full_sha("not-hex-chars-000000000000000000000000"));
    }

    #[test]
    fn host_key_policy_defaults_to_disabled() {
        assert!(matches!(host_key_policy_from_secret(None), HostKeyPolicy::Disabled));
    }

    #[test]
    fn host_key_policy_enforced_when_configured() {
        let policy = host_key_policy_from_secret(Some("deadbeef".to_string()));
        assert!(matches!(policy, HostKeyPolicy::Enforced { .. }));
    }

    #[tokio::test]
    async fn resolve_auth_none_requires_no_secret() {
        let cache = AppTokenCache::new();
        let resolved = resolve_auth(&gatewaysync_api::AuthDescriptor::None, |_, _| None, &cache)
            .await
            .unwrap();
        assert!(matches!(resolved, ResolvedAuth::None));
    }
}
