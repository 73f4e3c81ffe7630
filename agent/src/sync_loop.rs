//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! One pass of the agent's sync algorithm: read
//! metadata, resolve the ref, short-circuit when nothing changed, clone or
//! fetch the pinned commit, resolve this gateway's profile, template the
//! mappings, execute the plan via the sync engine, invoke post-sync hooks,
//! and write the status row. Structured as a sequence of small functions
//! the way `reconcile::apply` is, so each step stays independently
//! readable and unit-testable where it doesn't require a live cluster.
//!
//! SPDX-License-Identifier: Apache-2.0

use crate::credentials;
use crate::identity::{AgentIdentity, LiveSelectors};
use chrono::Utc;
use gatewaysync_api::{DiscoveredGateway, GatewaySyncState, Mapping, MappingType};
use kube::Client;
use profile_resolver::ResolvedProfile;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("signaling error: {0}")]
    Signaling(#[from] signaling::Error),
    #[error("git error: {0}")]
    Git(#[from] git_client::Error),
    #[error("credentials error: {0}")]
    Credentials(#[from] credentials::Error),
    #[error("profile '{0}' not found in metadata record")]
    UnknownProfile(String),
    #[error("no profile selected for this pod")]
    NoProfileSelected,
    #[error("template resolution error: {0}")]
    Template(#[from] template_resolver::Error),
    #[error("sync engine error: {0}")]
    SyncEngine(#[from] sync_engine::Error),
}

/// What happened on one trigger. The caller (the main loop) uses this to
/// decide whether to flip the readiness gate and whether to log at info
/// or warn level.
pub enum SyncOutcome {
    /// Nothing to do: paused, or commit/profile unchanged since last sync.
    Skipped(&'static str),
    /// The plan executed (possibly a no-op merge); `first_sync` is true
    /// only the first time this process completes one successfully.
    Synced { result: sync_engine::SyncResult, first_sync: bool },
    /// The sync failed; a status row with `Error` was written (when
    /// possible) before returning.
    Failed(String),
}

/// Carries the small amount of state that must survive across triggers
/// within one process lifetime: the last commit/profile combination that
/// synced successfully, and whether the first sync has completed yet.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub last_synced_commit: Option<String>,
    pub last_profile: Option<String>,
    pub initial_sync_done: bool,
}

#[instrument(skip(client, state), fields(pod = %identity.pod_name))]
pub async fn run_one(
    client: &Client,
    identity: &AgentIdentity,
    selectors: &LiveSelectors,
    state: &mut SyncState,
) -> SyncOutcome {
    let metadata = match signaling::read_metadata_record(client, &identity.namespace, &identity.gatewaysync_name).await {
        Ok(Some(m)) => m,
        Ok(None) => return SyncOutcome::Skipped("metadata record not yet published"),
        Err(err) => {
            warn!(%err, "failed to read metadata record");
            return SyncOutcome::Failed(err.to_string());
        }
    };

    if metadata.paused {
        return SyncOutcome::Skipped("GatewaySync is paused");
    }

    let profile_name = match &selectors.profile {
        Some(p) => p.clone(),
        None => {
            report_error(client, identity, None, "no profile annotation present on pod").await;
            return SyncOutcome::Failed(Error::NoProfileSelected.to_string());
        }
    };
    let profile = match metadata.profiles.get(&profile_name) {
        Some(p) => p.clone(),
        None => {
            report_error(client, identity, Some(profile_name.as_str()), &format!("profile '{profile_name}' not present in metadata record")).await;
            return SyncOutcome::Failed(Error::UnknownProfile(profile_name).to_string());
        }
    };

    // Step 2: resolve the ref, honoring a live ref-override via LsRemote.
    let auth = match credentials::load_auth(&identity.credentials_dir, &metadata.auth_type) {
        Ok(a) => a,
        Err(err) => {
            report_error(client, identity, Some(profile_name.as_str()), &err.to_string()).await;
            return SyncOutcome::Failed(err.to_string());
        }
    };
    let host_key_policy = credentials::load_host_key_policy(&identity.credentials_dir);

    let (commit, resolved_ref) = match &selectors.ref_override {
        Some(override_ref) => {
            match git_client::ls_remote(&metadata.git_url, override_ref, auth.clone(), host_key_policy.clone()).await {
                Ok(resolution) => (resolution.commit, override_ref.clone()),
                Err(err) => {
                    report_error(client, identity, Some(profile_name.as_str()), &format!("ref-override resolution failed: {err}")).await;
                    return SyncOutcome::Failed(err.to_string());
                }
            }
        }
        None => (metadata.commit.clone(), metadata.git_ref.clone()),
    };

    // Step 3: short-circuit when nothing changed.
    if state.initial_sync_done
        && state.last_synced_commit.as_deref() == Some(commit.as_str())
        && state.last_profile.as_deref() == Some(profile_name.as_str())
    {
        return SyncOutcome::Skipped("commit and profile unchanged since last sync");
    }

    let started = Instant::now();

    // Step 4: clone or fetch the pinned commit.
    if let Err(err) = git_client::clone_or_fetch(&metadata.git_url, &commit, &identity.work_dir, auth, host_key_policy).await {
        report_error(client, identity, Some(profile_name.as_str()), &format!("clone/fetch failed: {err}")).await;
        return SyncOutcome::Failed(err.to_string());
    }

    // Steps 6-7: template-resolve mappings, build and execute the plan.
    let plan = match build_plan(identity, &profile, &resolved_ref, &commit) {
        Ok(p) => p,
        Err(err) => {
            report_error(client, identity, Some(profile_name.as_str()), &err.to_string()).await;
            return SyncOutcome::Failed(err.to_string());
        }
    };

    let outcome = match sync_engine::execute(&plan) {
        Ok(o) => o,
        Err(err) => {
            report_error(client, identity, Some(profile_name.as_str()), &format!("sync engine error: {err}")).await;
            return SyncOutcome::Failed(err.to_string());
        }
    };

    let result = match outcome {
        sync_engine::Outcome::Applied(result) => result,
        sync_engine::Outcome::DryRun(_) => sync_engine::SyncResult::default(),
    };

    let files_changed = result.added + result.modified + result.deleted;
    let is_first_sync = !state.initial_sync_done;

    // Post-sync hooks are skipped entirely on the initial sync (see
    // DESIGN.md for the rationale). A permanent hook failure never
    // invalidates the file sync itself; it only downgrades this row's
    // reported status, per the hook-failure propagation rule.
    let hooks = if !is_first_sync && files_changed > 0 {
        run_hooks(identity, &profile, metadata.gateway_port, metadata.gateway_tls).await
    } else {
        HookOutcome::skipped()
    };

    state.last_synced_commit = Some(commit.clone());
    state.last_profile = Some(profile_name.clone());
    state.initial_sync_done = true;

    // Step 9: write the status row.
    let row = DiscoveredGateway {
        name: identity.gateway_name.clone(),
        namespace: identity.namespace.clone(),
        pod_name: identity.pod_name.clone(),
        profile: Some(profile_name),
        sync_status: hooks.sync_status,
        synced_commit: Some(commit),
        synced_ref: Some(resolved_ref),
        last_sync_time: Some(Utc::now()),
        last_sync_duration_ms: Some(started.elapsed().as_millis() as u64),
        agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        last_scan_result: hooks.last_scan_result,
        files_changed: Some(files_changed),
        projects_synced: Some(result.projects_synced),
    };
    if let Err(err) = signaling::write_own_status_row(client, &identity.namespace, &identity.gatewaysync_name, &identity.pod_name, &row).await {
        warn!(%err, "failed to write status row");
    }

    info!(files_changed, first_sync = is_first_sync, "sync complete");
    SyncOutcome::Synced { result, first_sync: is_first_sync }
}

fn build_plan(
    identity: &AgentIdentity,
    profile: &ResolvedProfile,
    resolved_ref: &str,
    commit: &str,
) -> Result<sync_engine::Plan, Error> {
    let ctx = template_resolver::Context {
        vars: profile.vars.clone(),
        gateway_name: identity.gateway_name.clone(),
        namespace: identity.namespace.clone(),
        git_ref: resolved_ref.to_string(),
        commit: commit.to_string(),
    };

    let mut mappings = Vec::with_capacity(profile.mappings.len());
    for mapping in &profile.mappings {
        mappings.push(resolve_mapping(identity, mapping, &ctx)?);
    }

    Ok(sync_engine::Plan {
        mappings,
        excludes: profile.exclude_patterns.clone(),
        staging_dir: identity.work_dir.join(".sync-staging"),
        live_dir: identity.live_dir.clone(),
        dry_run: profile.dry_run,
    })
}

fn resolve_mapping(
    identity: &AgentIdentity,
    mapping: &Mapping,
    ctx: &template_resolver::Context,
) -> Result<sync_engine::ResolvedMapping, Error> {
    let source_rel = template_resolver::resolve(&mapping.source, ctx)?;
    let dest_rel = template_resolver::resolve(&mapping.destination, ctx)?;
    let source_abs = identity.work_dir.join(&source_rel);
    let kind = infer_kind(&source_abs, mapping.r#type);

    Ok(sync_engine::ResolvedMapping {
        source_abs,
        dest_rel,
        kind,
        required: mapping.required,
    })
}

/// Resolves `MappingType::Infer` by statting the resolved source path at
/// plan-build time. A missing-but-required source falls through to `File`: the kind is
/// never consulted in that branch because the staging build's
/// existence/`required` check runs first.
fn infer_kind(source_abs: &Path, declared: MappingType) -> sync_engine::MappingKind {
    match declared {
        MappingType::Dir => sync_engine::MappingKind::Dir,
        MappingType::File => sync_engine::MappingKind::File,
        MappingType::Infer => match std::fs::metadata(source_abs) {
            Ok(meta) if meta.is_dir() => sync_engine::MappingKind::Dir,
            Ok(meta) if meta.is_file() => sync_engine::MappingKind::File,
            _ => sync_engine::MappingKind::File,
        },
    }
}

/// What the post-sync hooks found, folded into the status row the caller
/// writes: a permanent hook failure reports `Error` with a reason, but the
/// commit/ref/timing fields the caller already populated stand unchanged,
/// since the file sync itself succeeded.
#[derive(Debug)]
struct HookOutcome {
    sync_status: GatewaySyncState,
    last_scan_result: Option<String>,
}

impl HookOutcome {
    /// Hooks weren't run at all (initial sync, or a no-op merge): the row
    /// reports the plain `Synced` status the caller already decided on.
    fn skipped() -> Self {
        HookOutcome { sync_status: GatewaySyncState::Synced, last_scan_result: None }
    }
}

async fn run_hooks(identity: &AgentIdentity, profile: &ResolvedProfile, gateway_port: u16, gateway_tls: bool) -> HookOutcome {
    let api_key = match credentials::load_gateway_api_key(&identity.credentials_dir) {
        Ok(key) => key,
        Err(err) => {
            warn!(%err, "could not read gateway API key, skipping post-sync hooks");
            return HookOutcome {
                sync_status: GatewaySyncState::Synced,
                last_scan_result: Some(format!("post-sync hooks skipped: {err}")),
            };
        }
    };
    let scheme = if gateway_tls { "https" } else { "http" };
    let base_url = format!("{scheme}://127.0.0.1:{gateway_port}");
    let http = reqwest::Client::new();
    let client = sync_hooks::GatewayClient::new(http, base_url, api_key);

    let mut notes = Vec::new();
    let mut sync_status = GatewaySyncState::Synced;

    if !sync_hooks::check_health(&client).await {
        notes.push("health check did not pass after retries".to_string());
    }

    if let Err(err) = sync_hooks::check_designer_sessions(&client, profile.designer_session_policy).await {
        warn!(%err, "designer-session check did not clear, scan hooks still fire per spec ordering");
        sync_status = GatewaySyncState::Error;
        notes.push(err.to_string());
    }

    let scan = sync_hooks::scan_projects_then_config(&client).await;
    if !scan.all_ok() {
        sync_status = GatewaySyncState::Error;
        notes.push("scan hook did not complete successfully".to_string());
    }

    HookOutcome { sync_status, last_scan_result: if notes.is_empty() { None } else { Some(notes.join("; ")) } }
}

async fn report_error(client: &Client, identity: &AgentIdentity, profile: Option<&str>, message: &str) {
    let row = DiscoveredGateway {
        name: identity.gateway_name.clone(),
        namespace: identity.namespace.clone(),
        pod_name: identity.pod_name.clone(),
        profile: profile.map(|p| p.to_string()),
        sync_status: GatewaySyncState::Error,
        last_scan_result: Some(message.to_string()),
        ..Default::default()
    };
    if let Err(err) = signaling::write_own_status_row(client, &identity.namespace, &identity.gatewaysync_name, &identity.pod_name, &row).await {
        warn!(%err, "failed to write error status row");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AgentIdentity {
        AgentIdentity {
            pod_name: "gw-pod-1".to_string(),
            namespace: "demo".to_string(),
            gatewaysync_name: "demo-gatewaysync".to_string(),
            gateway_name: "gw-1".to_string(),
            annotations_path: PathBuf::from("/tmp/annotations"),
            credentials_dir: PathBuf::from("/tmp/credentials"),
            work_dir: PathBuf::from("/tmp/work"),
            live_dir: PathBuf::from("/tmp/live"),
            readiness_addr: "0.0.0.0:8081".to_string(),
        }
    }

    #[test]
    fn infer_kind_defaults_to_file_when_source_absent() {
        let kind = infer_kind(Path::new("/nonexistent/path/for/test"), MappingType::Infer);
        assert!(matches!(kind, sync_engine::MappingKind::File));
    }

    #[test]
    fn declared_type_is_never_overridden() {
        let kind = infer_kind(Path::new("/nonexistent/path/for/test"), MappingType::Dir);
        assert!(matches!(kind, sync_engine::MappingKind::Dir));
    }

    #[test]
    fn infer_kind_detects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let kind = infer_kind(dir.path(), MappingType::Infer);
        assert!(matches!(kind, sync_engine::MappingKind::Dir));
    }

    #[test]
    fn infer_kind_detects_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f.json");
        std::fs::write(&file_path, b"{}").unwrap();
        let kind = infer_kind(&file_path, MappingType::Infer);
        assert!(matches!(kind, sync_engine::MappingKind::File));
    }

    #[test]
    fn build_plan_resolves_templates_in_mappings() {
        let id = identity();
        let mut profile = ResolvedProfile {
            name: "line1".to_string(),
            mappings: vec![Mapping {
                source: "sites/{{.Site}}".to_string(),
                destination: "config".to_string(),
                r#type: MappingType::Dir,
                required: false,
                transform: None,
            }],
            vars: Default::default(),
            exclude_patterns: vec![],
            sync_period: std::time::Duration::from_secs(30),
            dry_run: false,
            designer_session_policy: Default::default(),
            paused: false,
            depends_on: vec![],
        };
        profile.vars.insert("Site".to_string(), "plant-a".to_string());

        let plan = build_plan(&id, &profile, "main", "abc123").unwrap();
        assert_eq!(plan.mappings[0].source_abs, id.work_dir.join("sites/plant-a"));
        assert_eq!(plan.mappings[0].dest_rel, "config");
    }
}
