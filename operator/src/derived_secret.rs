//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Lifecycle of the derived credential secret for GitHub App auth: the
//! controller exchanges the app's private key for a short-lived
//! installation token (see `git_client::AppTokenCache`), then materializes
//! that token into an owned `Secret` so the webhook can mount it into
//! agent pods as a plain git-token file, the same shape `ResolvedAuth::Ssh`
//! and `ResolvedAuth::Token` already expect on disk. Only app-identity auth
//! needs this: ssh/token auth already name a user-owned secret the webhook
//! mounts directly.
//!
//! SPDX-License-Identifier: Apache-2.0

use gatewaysync_api::GatewaySync;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use thiserror::Error;

const FIELD_MANAGER: &str = "gatewaysync-operator.sync.stoker.io";
const TOKEN_KEY: &str = "git-token";

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("GatewaySync has no owner reference")]
    MissingOwnerRef,
}

pub fn secret_name(gatewaysync_name: &str) -> String {
    format!("{gatewaysync_name}-git-app-token")
}

/// Whether this call materialized the secret for the first time (the caller
/// audit-logs only that transition, not every refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOutcome {
    Created,
    Refreshed,
}

/// Idempotently writes the resolved installation token into the derived
/// secret. Safe to call on every revolution that resolved app-identity
/// auth: server-side apply is a no-op once the token value is unchanged,
/// and only changes when `AppTokenCache` actually refreshed it.
pub async fn ensure_app_token_secret(
    client: &Client,
    owner: &GatewaySync,
    namespace: &str,
    token: &str,
) -> Result<SecretOutcome, Error> {
    let name = secret_name(&owner.name_any());
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let owner_ref = owner.controller_owner_ref(&()).ok_or(Error::MissingOwnerRef)?;

    let existed_with_same_token = api
        .get_opt(&name)
        .await?
        .and_then(|s| s.data)
        .and_then(|d| d.get(TOKEN_KEY).cloned())
        .map(|bytes| bytes.0 == token.as_bytes())
        .unwrap_or(false);

    let mut data = BTreeMap::new();
    data.insert(TOKEN_KEY.to_string(), ByteString(token.as_bytes().to_vec()));

    let desired = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired)).await?;

    Ok(if existed_with_same_token { SecretOutcome::Refreshed } else { SecretOutcome::Created })
}

/// Deletes the derived secret at finalization. Also happens automatically
/// via the owner reference's garbage collection, but an explicit delete
/// keeps this cleanup symmetric with the metadata/status record deletes in
/// `reconcile::cleanup` and gives the audit trail a definite event to log
/// against, rather than relying on GC timing.
pub async fn delete_app_token_secret(client: &Client, namespace: &str, gatewaysync_name: &str) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let _ = api.delete(&secret_name(gatewaysync_name), &Default::default()).await;
    Ok(())
}
