//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! One reconcile revolution over a `GatewaySync` record: finalizer
//! management, the paused gate, profile validation, secret-existence
//! backoff, ref resolution, metadata publication, gateway discovery,
//! RBAC auto-bind, condition aggregation, metrics, and the status patch.
//! Structured as a finalizer-wrapped `apply`/`cleanup` split.
//!
//! SPDX-License-Identifier: Apache-2.0

use crate::context::Context;
use crate::{derived_secret, metrics, rbac};
use chrono::Utc;
use gatewaysync_api::{
    condition_types, set_condition, AuthDescriptor, Condition, ConditionStatus, GatewaySync,
    GatewaySyncState, RefResolutionStatus,
};
use git_client::{HostKeyPolicy, ResolvedAuth};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const FINALIZER_NAME: &str = "sync.stoker.io/finalizer";
const FIELD_MANAGER: &str = "gatewaysync-operator.sync.stoker.io";
const ANNOTATION_REF_OVERRIDE: &str = "sync.stoker.io/ref-override";
const DEFAULT_SSH_KEY_FIELD: &str = "sshPrivateKey";
const DEFAULT_TOKEN_FIELD: &str = "token";
const DEFAULT_APP_KEY_FIELD: &str = "privateKey";
const DEFAULT_KNOWN_HOSTS_FIELD: &str = "knownHostsSha256";
const DEFAULT_API_KEY_FIELD: &str = "apiKey";

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("GatewaySync is missing a namespace")]
    MissingNamespace,
    #[error("finalizer error: {0}")]
    Finalizer(String),
    #[error("profile resolution error: {0}")]
    ProfileResolve(#[from] profile_resolver::Error),
    #[error("signaling error: {0}")]
    Signaling(#[from] signaling::Error),
    #[error("gateway discovery error: {0}")]
    Discovery(#[from] gateway_discovery::Error),
    #[error("git auth resolution failed: {0}")]
    GitAuth(String),
}

#[instrument(skip(gs, ctx), fields(name = %gs.name_any()))]
pub async fn reconcile(gs: Arc<GatewaySync>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = gs.namespace().ok_or(Error::MissingNamespace)?;
    let api: Api<GatewaySync> = Api::namespaced(ctx.client.clone(), &ns);

    let timer = metrics::RECONCILE_DURATION_SECONDS.start_timer();
    let outcome = finalizer(&api, FINALIZER_NAME, gs, |event| async {
        match event {
            FinalizerEvent::Apply(gs) => apply(gs, ctx.clone()).await,
            FinalizerEvent::Cleanup(gs) => cleanup(gs, ctx.clone()).await,
        }
    })
    .await;
    timer.observe_duration();

    match outcome {
        Ok(action) => {
            metrics::RECONCILES_TOTAL.with_label_values(&["success"]).inc();
            Ok(action)
        }
        Err(err) => {
            metrics::RECONCILES_TOTAL.with_label_values(&["error"]).inc();
            warn!(error = %err, "reconcile revolution failed");
            Err(Error::Finalizer(err.to_string()))
        }
    }
}

pub fn on_error(_gs: Arc<GatewaySync>, error: &Error, _ctx: Arc<Context>) -> Action {
    tracing::error!(%error, "reconcile error, requeueing shortly");
    Action::requeue(Duration::from_secs(30))
}

/// Step 2 (cascade branch): deletes the metadata/status records, the
/// derived app-token secret (if app-identity auth ever materialized one),
/// and purges this record's metric series. The owner reference would
/// eventually garbage-collect the same objects, but the explicit delete
/// here gives the audit trail a definite event rather than relying on GC
/// timing.
async fn cleanup(gs: Arc<GatewaySync>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = gs.namespace().ok_or(Error::MissingNamespace)?;
    let name = gs.name_any();
    let key = record_key(&ns, &name);

    let metadata_name = signaling::metadata_record_name(&name);
    let status_name = signaling::status_record_name(&name);
    let cms: Api<k8s_openapi::api::core::v1::ConfigMap> = Api::namespaced(ctx.client.clone(), &ns);
    for cm_name in [metadata_name, status_name] {
        let _ = cms.delete(&cm_name, &Default::default()).await;
    }

    if matches!(gs.spec.git.auth, AuthDescriptor::App { .. }) {
        if derived_secret::delete_app_token_secret(&ctx.client, &ns, &name).await.is_ok() {
            let _ = audit_logger::log_audit_event(
                ctx.client.clone(),
                "delete".to_string(),
                "gatewaysync-operator".to_string(),
                None,
                Some(audit_logger::Target {
                    kind: Some("Secret".to_string()),
                    name: Some(derived_secret::secret_name(&name)),
                    namespace: Some(ns.clone()),
                }),
                std::collections::BTreeMap::new(),
            )
            .await;
        }
    }

    ctx.backoff.forget(&key);
    ctx.ref_cache.forget(&key);
    metrics::purge_record_metrics(&name, &ns);

    info!(name, namespace = ns, "GatewaySync cleaned up, finalizer will be removed");
    Ok(Action::await_change())
}

/// Steps 3 through 15.
async fn apply(gs: Arc<GatewaySync>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = gs.namespace().ok_or(Error::MissingNamespace)?;
    let name = gs.name_any();
    let key = record_key(&ns, &name);
    let generation = gs.meta().generation.unwrap_or(0);

    let mut status = gs.status.clone().unwrap_or_default();
    let base_status = status.clone();

    // Step 3: paused gate.
    if gs.spec.paused {
        let flipped = set_condition(
            &mut status.conditions,
            cond(condition_types::READY, ConditionStatus::False, "Paused", "record is paused", generation),
        );
        if flipped {
            info!(name, namespace = ns, "GatewaySync transitioned to paused");
            crate::events::paused(&ctx.client, &gs, ctx.reporter.clone()).await;
        }
        metrics::PAUSED.with_label_values(&[&name, &ns]).set(1);
        patch_status_if_changed(&ctx, &gs, &base_status, &status).await?;
        return Ok(Action::requeue(Duration::from_secs(gs.spec.polling.interval_seconds)));
    }
    metrics::PAUSED.with_label_values(&[&name, &ns]).set(0);

    // Step 4: profile validation (always runs).
    let resolved_profiles = match profile_resolver::resolve(&gs.spec.sync.defaults, &gs.spec.sync.profiles) {
        Ok(profiles) => {
            set_condition(
                &mut status.conditions,
                cond(condition_types::PROFILES_VALID, ConditionStatus::True, "Valid", "all profiles resolved", generation),
            );
            profiles
        }
        Err(err) => {
            let flipped = set_condition(
                &mut status.conditions,
                cond(condition_types::PROFILES_VALID, ConditionStatus::False, "Invalid", &err.to_string(), generation),
            );
            set_condition(
                &mut status.conditions,
                cond(condition_types::READY, ConditionStatus::False, "ProfilesInvalid", &err.to_string(), generation),
            );
            if flipped {
                crate::events::profiles_invalid(&ctx.client, &gs, ctx.reporter.clone(), &err.to_string()).await;
            }
            patch_status_if_changed(&ctx, &gs, &base_status, &status).await?;
            return Ok(Action::requeue(Duration::from_secs(gs.spec.polling.interval_seconds)));
        }
    };

    // Step 5: secret existence (git auth + gateway API key).
    if let Err(message) = check_secrets_exist(&ctx, &ns, &gs.spec.git.auth, &gs.spec.gateway.api_key_secret_ref).await? {
        let delay = ctx.backoff.record_failure(&key);
        set_condition(
            &mut status.conditions,
            cond(condition_types::READY, ConditionStatus::False, "SecretMissing", &message, generation),
        );
        patch_status_if_changed(&ctx, &gs, &base_status, &status).await?;
        return Ok(Action::requeue(delay));
    }

    // Step 6: SSH host-key warning condition.
    let known_hosts = match &gs.spec.git.known_hosts_secret_ref {
        Some(secret_ref) => secret_value(&ctx, &ns, &secret_ref.name, secret_ref.key.as_deref().unwrap_or(DEFAULT_KNOWN_HOSTS_FIELD)).await?,
        None => None,
    };
    let is_ssh = matches!(gs.spec.git.auth, AuthDescriptor::Ssh { .. });
    if is_ssh {
        let verified = known_hosts.is_some();
        set_condition(
            &mut status.conditions,
            cond(
                condition_types::SSH_HOST_KEY_VERIFICATION,
                if verified { ConditionStatus::True } else { ConditionStatus::False },
                if verified { "Pinned" } else { "Unpinned" },
                if verified { "host key fingerprint pinned" } else { "no known-hosts secret configured, host key not verified" },
                generation,
            ),
        );
    }
    let host_key_policy = git_client::host_key_policy_from_secret(known_hosts);

    // Step 7: ref resolution, cache-first.
    let webhook_ref_override = gs.annotations().get(ANNOTATION_REF_OVERRIDE).cloned();
    let requested_ref = webhook_ref_override.clone().unwrap_or_else(|| gs.spec.git.git_ref.clone());
    let polling_interval = Duration::from_secs(gs.spec.polling.interval_seconds);

    let commit = if let Some(cached) = ctx.ref_cache.lookup(&key, &requested_ref, polling_interval) {
        cached
    } else {
        let secrets = SecretLookup::load(&ctx, &ns, &gs.spec.git.auth).await?;
        let auth = git_client::resolve_auth(&gs.spec.git.auth, |n, k| secrets.get(n, k), &ctx.token_cache)
            .await
            .map_err(|e| Error::GitAuth(e.to_string()))?;

        if let AuthDescriptor::App { app_id, installation_id, .. } = &gs.spec.git.auth {
            if let ResolvedAuth::Token { token } = &auth {
                match derived_secret::ensure_app_token_secret(&ctx.client, &gs, &ns, token).await {
                    Ok(derived_secret::SecretOutcome::Created) => {
                        let details = std::collections::BTreeMap::from([
                            ("appId".to_string(), app_id.to_string()),
                            ("installationId".to_string(), installation_id.to_string()),
                        ]);
                        let _ = audit_logger::log_audit_event(
                            ctx.client.clone(),
                            "create".to_string(),
                            "gatewaysync-operator".to_string(),
                            None,
                            Some(audit_logger::Target {
                                kind: Some("Secret".to_string()),
                                name: Some(derived_secret::secret_name(&name)),
                                namespace: Some(ns.clone()),
                            }),
                            details,
                        )
                        .await;
                    }
                    Ok(derived_secret::SecretOutcome::Refreshed) => {}
                    Err(err) => warn!(error = %err, "failed to materialize derived app-token secret, continuing"),
                }
            }
            if let Some(expiry) = ctx.token_cache.expiry(*app_id, *installation_id).await {
                metrics::TOKEN_EXPIRY_TIMESTAMP_SECONDS
                    .with_label_values(&[&app_id.to_string(), &installation_id.to_string()])
                    .set(expiry.timestamp());
            }
        }

        let timer = metrics::REF_RESOLVE_DURATION_SECONDS.start_timer();
        let resolution = git_client::ls_remote(&gs.spec.git.url, &requested_ref, auth, host_key_policy).await;
        timer.observe_duration();

        match resolution {
            Ok(resolved) => {
                ctx.backoff.reset(&key);
                ctx.ref_cache.store(&key, &requested_ref, &resolved.commit);
                set_condition(
                    &mut status.conditions,
                    cond(condition_types::REF_RESOLVED, ConditionStatus::True, "RefResolved", &resolved.commit, generation),
                );
                status.ref_resolution_status = RefResolutionStatus::Resolved;
                resolved.commit
            }
            Err(err) => {
                let delay = ctx.backoff.record_failure(&key);
                let flipped = set_condition(
                    &mut status.conditions,
                    cond(condition_types::REF_RESOLVED, ConditionStatus::False, "LsRemoteFailed", &err.to_string(), generation),
                );
                status.ref_resolution_status = RefResolutionStatus::Error;
                if flipped {
                    crate::events::ref_resolution_failed(&ctx.client, &gs, ctx.reporter.clone(), &err.to_string()).await;
                }
                patch_status_if_changed(&ctx, &gs, &base_status, &status).await?;
                return Ok(Action::requeue(delay));
            }
        }
    };

    status.last_sync_commit = Some(commit.clone());
    status.last_sync_commit_short = Some(commit.chars().take(7).collect());
    status.last_sync_ref = Some(requested_ref.clone());
    status.last_sync_time = Some(Utc::now());

    // Step 8: publish metadata record.
    let api_key_secret = &gs.spec.gateway.api_key_secret_ref;
    let _ = secret_value(&ctx, &ns, &api_key_secret.name, api_key_secret.key.as_deref().unwrap_or(DEFAULT_API_KEY_FIELD)).await?;
    let metadata = signaling::MetadataRecord {
        commit: commit.clone(),
        git_ref: requested_ref.clone(),
        git_url: gs.spec.git.url.clone(),
        auth_type: gs.spec.git.auth.type_name().to_string(),
        paused: gs.spec.paused,
        gateway_port: gs.spec.gateway.port,
        gateway_tls: gs.spec.gateway.tls,
        profiles: resolved_profiles,
    };
    signaling::write_metadata_record(&ctx.client, &ns, &gs, &metadata).await?;

    // Step 9: discover gateways, collect status rows, merge.
    let candidates = gateway_discovery::discover(&ctx.client, &ns, &name).await?;
    let status_rows = signaling::read_status_record(&ctx.client, &ns, &name).await?;
    let previously_missing_sidecar: std::collections::HashSet<&str> = base_status
        .discovered_gateways
        .iter()
        .filter(|g| g.sync_status == GatewaySyncState::MissingSidecar)
        .map(|g| g.pod_name.as_str())
        .collect();
    let previously_discovered_pods: std::collections::HashSet<&str> =
        base_status.discovered_gateways.iter().map(|g| g.pod_name.as_str()).collect();

    let mut discovered = Vec::new();
    for candidate in &candidates {
        let row = signaling::lookup_row(&status_rows, &candidate.pod_name, &candidate.display_name)
            .and_then(|raw| signaling::parse_status_row(raw).ok());
        let entry = gateway_discovery::merge_with_status_row(candidate, row);

        if entry.sync_status == GatewaySyncState::MissingSidecar
            && !previously_missing_sidecar.contains(candidate.pod_name.as_str())
        {
            crate::events::sidecar_missing(&ctx.client, &gs, ctx.reporter.clone(), &candidate.pod_name).await;
        }
        discovered.push(entry);

        // Step 10: RBAC auto-bind, one RoleBinding per distinct service account.
        if ctx.rbac_auto_bind {
            match rbac::ensure_agent_role_binding(&ctx.client, &gs, &ns, &candidate.service_account).await {
                Ok(rbac::BindingOutcome::Created) => {
                    let details = std::collections::BTreeMap::from([(
                        "serviceAccount".to_string(),
                        candidate.service_account.clone(),
                    )]);
                    let _ = audit_logger::log_audit_event(
                        ctx.client.clone(),
                        "bind".to_string(),
                        "gatewaysync-operator".to_string(),
                        None,
                        Some(audit_logger::Target {
                            kind: Some("RoleBinding".to_string()),
                            name: Some(format!("gatewaysync-{name}-{}-agent", candidate.service_account)),
                            namespace: Some(ns.clone()),
                        }),
                        details,
                    )
                    .await;
                }
                Ok(rbac::BindingOutcome::Unchanged) => {}
                Err(err) => {
                    warn!(pod = candidate.pod_name, error = %err, "RBAC auto-bind failed, continuing");
                    crate::events::rbac_error(&ctx.client, &gs, ctx.reporter.clone(), &candidate.service_account, &err.to_string()).await;
                }
            }
        }
    }
    if discovered.iter().any(|g| !previously_discovered_pods.contains(g.pod_name.as_str())) {
        crate::events::gateways_discovered(&ctx.client, &gs, ctx.reporter.clone(), discovered.len()).await;
    }
    status.discovered_gateways = discovered.clone();

    // Step 11: aggregate conditions.
    let synced = discovered.iter().filter(|g| g.sync_status == GatewaySyncState::Synced).count();
    let missing_sidecar = discovered.iter().filter(|g| g.sync_status == GatewaySyncState::MissingSidecar).count();
    let total = discovered.len();
    let all_synced = total > 0 && synced == total;
    let mut message = format!("{synced}/{total} synced");
    if missing_sidecar > 0 {
        message.push_str(&format!(", {missing_sidecar} missing sidecar"));
    }
    set_condition(
        &mut status.conditions,
        cond(
            condition_types::ALL_GATEWAYS_SYNCED,
            if all_synced { ConditionStatus::True } else { ConditionStatus::False },
            "Aggregated",
            &message,
            generation,
        ),
    );

    let sidecar_injected = missing_sidecar == 0;
    set_condition(
        &mut status.conditions,
        cond(
            condition_types::SIDECAR_INJECTED,
            if sidecar_injected { ConditionStatus::True } else { ConditionStatus::False },
            if sidecar_injected { "AllInjected" } else { "SidecarMissing" },
            &message,
            generation,
        ),
    );

    let ref_resolved = status.conditions.iter().any(|c| c.type_ == condition_types::REF_RESOLVED && c.status == ConditionStatus::True);
    let profiles_valid = status.conditions.iter().any(|c| c.type_ == condition_types::PROFILES_VALID && c.status == ConditionStatus::True);
    let ready = ref_resolved && profiles_valid && all_synced;
    set_condition(
        &mut status.conditions,
        cond(
            condition_types::READY,
            if ready { ConditionStatus::True } else { ConditionStatus::False },
            "Aggregated",
            &message,
            generation,
        ),
    );

    // Step 12: metrics update.
    metrics::DISCOVERED_GATEWAYS.with_label_values(&[&name, &ns]).set(total as i64);
    metrics::SYNCED_GATEWAYS.with_label_values(&[&name, &ns]).set(synced as i64);
    metrics::MISSING_SIDECAR_GATEWAYS.with_label_values(&[&name, &ns]).set(missing_sidecar as i64);
    metrics::READY.with_label_values(&[&name, &ns]).set(if ready { 1 } else { 0 });
    for condition in &status.conditions {
        metrics::CONDITION_STATUS
            .with_label_values(&[&name, &ns, &condition.type_])
            .set(condition_status_value(condition.status));
    }
    for gw in &discovered {
        metrics::GATEWAY_SYNC_STATUS
            .with_label_values(&[&name, &ns, &gw.pod_name])
            .set(gw.sync_status.as_metric_value());
    }
    metrics::INFO
        .with_label_values(&[
            &name,
            &ns,
            &gs.spec.git.url,
            &gs.spec.git.git_ref,
            gs.spec.git.auth.type_name(),
            &gs.spec.polling.interval_seconds.to_string(),
        ])
        .set(1);

    status.observed_generation = Some(generation);

    // Step 13: three-way-merge status patch.
    patch_status_if_changed(&ctx, &gs, &base_status, &status).await?;

    // Step 14: clear stale webhook override.
    if let Some(override_ref) = &webhook_ref_override {
        if normalize_ref_for_comparison(override_ref) == normalize_ref_for_comparison(&gs.spec.git.git_ref) {
            let api: Api<GatewaySync> = Api::namespaced(ctx.client.clone(), &ns);
            let patch = serde_json::json!({
                "metadata": { "annotations": { ANNOTATION_REF_OVERRIDE: serde_json::Value::Null } }
            });
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)).await?;
        }
    }

    // Step 15: requeue.
    Ok(Action::requeue(polling_interval))
}

fn cond(type_: &str, status: ConditionStatus, reason: &str, message: &str, generation: i64) -> Condition {
    Condition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: generation,
        last_transition_time: Utc::now(),
    }
}

fn condition_status_value(status: ConditionStatus) -> i64 {
    match status {
        ConditionStatus::True => 1,
        ConditionStatus::False => 0,
        ConditionStatus::Unknown => -1,
    }
}

fn record_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Leading-`v` insensitive ref comparison, e.g. `v1.2.3` and `1.2.3`
/// compare equal. Used only to decide whether a webhook-requested override
/// has caught up with the declared spec ref.
fn normalize_ref_for_comparison(r: &str) -> &str {
    r.strip_prefix('v').unwrap_or(r)
}

async fn secret_value(ctx: &Context, namespace: &str, name: &str, key: &str) -> Result<Option<String>, Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let secret = match api.get_opt(name).await? {
        Some(s) => s,
        None => return Ok(None),
    };
    Ok(secret
        .data
        .unwrap_or_default()
        .get(key)
        .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string()))
}

/// Verifies the secrets the reconciler itself depends on exist (not
/// necessarily their exact key), returning a human-readable message on the
/// first missing one.
async fn check_secrets_exist(
    ctx: &Context,
    namespace: &str,
    auth: &AuthDescriptor,
    api_key_secret_ref: &gatewaysync_api::SecretRef,
) -> Result<Result<(), String>, Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);

    if let Some(secret_name) = auth_secret_name(auth) {
        if api.get_opt(secret_name).await?.is_none() {
            return Ok(Err(format!("git auth secret '{secret_name}' not found")));
        }
    }
    if api.get_opt(&api_key_secret_ref.name).await?.is_none() {
        return Ok(Err(format!("gateway API key secret '{}' not found", api_key_secret_ref.name)));
    }
    Ok(Ok(()))
}

fn auth_secret_name(auth: &AuthDescriptor) -> Option<&str> {
    match auth {
        AuthDescriptor::None => None,
        AuthDescriptor::Ssh { secret_ref } | AuthDescriptor::Token { secret_ref } | AuthDescriptor::App { secret_ref, .. } => {
            Some(&secret_ref.name)
        }
    }
}

/// Pre-fetches every secret value `git_client::resolve_auth` might need,
/// since its credentials closure must be synchronous.
struct SecretLookup {
    values: HashMap<(String, String), String>,
}

impl SecretLookup {
    async fn load(ctx: &Context, namespace: &str, auth: &AuthDescriptor) -> Result<Self, Error> {
        let mut values = HashMap::new();
        if let Some(secret_ref) = auth_secret_ref(auth) {
            let default_key = match auth {
                AuthDescriptor::Ssh { .. } => DEFAULT_SSH_KEY_FIELD,
                AuthDescriptor::Token { .. } => DEFAULT_TOKEN_FIELD,
                AuthDescriptor::App { .. } => DEFAULT_APP_KEY_FIELD,
                AuthDescriptor::None => "",
            };
            let key = secret_ref.key.as_deref().unwrap_or(default_key);
            if let Some(value) = secret_value(ctx, namespace, &secret_ref.name, key).await? {
                values.insert((secret_ref.name.clone(), key.to_string()), value);
            }
        }
        Ok(SecretLookup { values })
    }

    fn get(&self, name: &str, key: Option<&str>) -> Option<String> {
        let default_key = "";
        let key = key.unwrap_or(default_key);
        self.values
            .iter()
            .find(|((n, k), _)| n == name && (k == key || key.is_empty()))
            .map(|(_, v)| v.clone())
    }
}

fn auth_secret_ref(auth: &AuthDescriptor) -> Option<&gatewaysync_api::SecretRef> {
    match auth {
        AuthDescriptor::None => None,
        AuthDescriptor::Ssh { secret_ref } | AuthDescriptor::Token { secret_ref } | AuthDescriptor::App { secret_ref, .. } => {
            Some(secret_ref)
        }
    }
}

/// Three-way-ish merge: only issues a status patch when the computed status
/// differs from the status observed at the start of this revolution, so
/// overlapping revolutions don't thrash the resource version.
async fn patch_status_if_changed(
    ctx: &Context,
    gs: &GatewaySync,
    base: &gatewaysync_api::GatewaySyncStatus,
    next: &gatewaysync_api::GatewaySyncStatus,
) -> Result<(), Error> {
    if base.observed_generation == next.observed_generation
        && base.last_sync_commit == next.last_sync_commit
        && base.discovered_gateways == next.discovered_gateways
        && base.conditions.len() == next.conditions.len()
        && base
            .conditions
            .iter()
            .zip(next.conditions.iter())
            .all(|(b, n)| b.status == n.status && b.reason == n.reason && b.message == n.message)
    {
        return Ok(());
    }

    let ns = gs.namespace().ok_or(Error::MissingNamespace)?;
    let name = gs.name_any();
    let api: Api<GatewaySync> = Api::namespaced(ctx.client.clone(), &ns);
    let patch = serde_json::json!({ "status": next });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_normalization_strips_leading_v() {
        assert_eq!(normalize_ref_for_comparison("v1.2.3"), "1.2.3");
        assert_eq!(normalize_ref_for_comparison("1.2.3"), "1.2.3");
        assert_eq!(normalize_ref_for_comparison("main"), "main");
    }

    #[test]
    fn condition_status_values_match_metric_encoding() {
        assert_eq!(condition_status_value(ConditionStatus::True), 1);
        assert_eq!(condition_status_value(ConditionStatus::False), 0);
        assert_eq!(condition_status_value(ConditionStatus::Unknown), -1);
    }
}
