//! Auth resolution: a pure function from the declared auth descriptor and
//! secret contents to a concrete `git2` credentials callback, plus the
//! GitHub App installation-token exchange and cache.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;

#[derive(Debug, Clone)]
pub enum ResolvedAuth {
    None,
    Token { token: String },
    Ssh { private_key_path: PathBuf, passphrase: Option<String> },
}

impl ResolvedAuth {
    pub fn apply_credentials(&self, callbacks: &mut git2::RemoteCallbacks) {
        match self.clone() {
            ResolvedAuth::None => {}
            ResolvedAuth::Token { token } => {
                callbacks.credentials(move |_url, _username, _allowed| {
                    git2::Cred::userpass_plaintext(&token, "")
                });
            }
            ResolvedAuth::Ssh { private_key_path, passphrase } => {
                callbacks.credentials(move |_url, username_from_url, _allowed| {
                    git2::Cred::ssh_key(
                        username_from_url.unwrap_or("git"),
                        None,
                        &private_key_path,
                        passphrase.as_deref(),
                    )
                });
            }
        }
    }
}

/// SSH host-key verification is enabled only when a known-hosts reference
/// is configured on the record. Otherwise the connection proceeds and the
/// caller is responsible for raising the `SSHHostKeyVerification=False`
/// condition — this module only decides whether to enforce, not how the
/// result is surfaced.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    Enforced { known_hosts_sha256: String },
    Disabled,
}

pub fn apply_host_key_policy(policy: &HostKeyPolicy, callbacks: &mut git2::RemoteCallbacks) {
    if let HostKeyPolicy::Enforced { known_hosts_sha256 } = policy.clone() {
        callbacks.certificate_check(move |cert, _host| {
            if let Some(hostkey) = cert.as_hostkey() {
                if let Some(fingerprint) = hostkey.hash_sha256() {
                    let actual = base64_like_hex(fingerprint);
                    if actual == known_hosts_sha256 {
                        return Ok(git2::CertificateCheckStatus::CertificateOk);
                    }
                }
            }
            Ok(git2::CertificateCheckStatus::CertificatePassthrough)
        });
    }
}

fn base64_like_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Caches GitHub App installation tokens per `(appId, installationId)`,
/// refreshed when within 5 minutes of expiry.
#[derive(Clone, Default)]
pub struct AppTokenCache {
    entries: Arc<RwLock<HashMap<(u64, u64), CachedToken>>>,
}

impl AppTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_refresh(
        &self,
        app_id: u64,
        installation_id: u64,
        private_key_pem: &str,
    ) -> Result<String, Error> {
        {
            let guard = self.entries.read().await;
            if let Some(cached) = guard.get(&(app_id, installation_id)) {
                if cached.expires_at - Utc::now() > ChronoDuration::minutes(5) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let (token, expires_at) = exchange_installation_token(app_id, installation_id, private_key_pem).await?;
        let mut guard = self.entries.write().await;
        guard.insert((app_id, installation_id), CachedToken { token: token.clone(), expires_at });
        Ok(token)
    }

    /// Returns the expiry timestamp for a cached token, used by the
    /// `gatewaysync_token_expiry_timestamp_seconds` gauge.
    pub async fn expiry(&self, app_id: u64, installation_id: u64) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(&(app_id, installation_id)).map(|c| c.expires_at)
    }
}

async fn exchange_installation_token(
    app_id: u64,
    installation_id: u64,
    private_key_pem: &str,
) -> Result<(String, DateTime<Utc>), Error> {
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| Error::AppExchange(e.to_string()))?;

    let octocrab = octocrab::Octocrab::builder()
        .app(app_id.into(), key)
        .build()
        .map_err(|e| Error::AppExchange(e.to_string()))?;

    let (_scoped, token) = octocrab
        .installation_and_token(installation_id.into())
        .await
        .map_err(|e| Error::AppExchange(e.to_string()))?;

    // GitHub installation tokens are valid for one hour from issuance.
    Ok((token.expose_secret().to_string(), Utc::now() + ChronoDuration::hours(1)))
}
