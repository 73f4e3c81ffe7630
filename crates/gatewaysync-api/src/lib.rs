//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! CustomResource definition and shared wire types for GatewaySync.
//!
//! This crate has no Kubernetes-client-side behavior (no reconcile, no
//! discovery, no signaling I/O) — it is the type vocabulary every other
//! crate in the workspace shares, keeping CRD struct definitions free of
//! controller logic.
//!
//! SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The `GatewaySync` custom resource: one logical sync domain (a Git
/// repository plus the gateway pods it drives).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "sync.stoker.io",
    version = "v1alpha1",
    kind = "GatewaySync",
    namespaced,
    status = "GatewaySyncStatus",
    shortname = "gwsync",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.lastSyncCommitShort"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySyncSpec {
    pub git: GitSpec,
    pub gateway: GatewaySpec,
    pub sync: SyncSpec,
    #[serde(default)]
    pub polling: PollingSpec,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSpec {
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub auth: AuthDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_secret_ref: Option<SecretRef>,
}

/// One of three mutually-exclusive ways to authenticate to the Git remote.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AuthDescriptor {
    None,
    Ssh { secret_ref: SecretRef },
    Token { secret_ref: SecretRef },
    App {
        secret_ref: SecretRef,
        app_id: u64,
        installation_id: u64,
    },
}

impl AuthDescriptor {
    pub fn type_name(&self) -> &'static str {
        match self {
            AuthDescriptor::None => "none",
            AuthDescriptor::Ssh { .. } => "ssh",
            AuthDescriptor::Token { .. } => "token",
            AuthDescriptor::App { .. } => "app",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    pub api_key_secret_ref: SecretRef,
}

fn default_gateway_port() -> u16 {
    8088
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollingSpec {
    #[serde(default = "default_polling_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for PollingSpec {
    fn default() -> Self {
        PollingSpec {
            interval_seconds: default_polling_interval_seconds(),
        }
    }
}

fn default_polling_interval_seconds() -> u64 {
    60
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncSpec {
    #[serde(default)]
    pub defaults: SyncDefaults,
    pub profiles: std::collections::BTreeMap<String, ProfileSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncDefaults {
    #[serde(default)]
    pub vars: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_period_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designer_session_policy: Option<DesignerSessionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DesignerSessionPolicy {
    Wait,
    Proceed,
    Fail,
}

impl Default for DesignerSessionPolicy {
    fn default() -> Self {
        DesignerSessionPolicy::Proceed
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub mappings: Vec<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_period_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designer_session_policy: Option<DesignerSessionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub r#type: MappingType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

/// `Infer` resolves to `Dir` or `File` at plan-build time by statting the
/// resolved source path.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MappingType {
    #[default]
    Infer,
    Dir,
    File,
}

// --- Observed state ---

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySyncStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_commit_short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ref_resolution_status: RefResolutionStatus,
    #[serde(default)]
    pub discovered_gateways: Vec<DiscoveredGateway>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum RefResolutionStatus {
    #[default]
    NotResolved,
    Resolving,
    Resolved,
    Error,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredGateway {
    pub name: String,
    pub namespace: String,
    pub pod_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub sync_status: GatewaySyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects_synced: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum GatewaySyncState {
    #[default]
    Pending,
    Syncing,
    Synced,
    Error,
    MissingSidecar,
}

impl GatewaySyncState {
    /// Small-integer encoding used by the `gatewaysync_gateway_sync_status` gauge.
    pub fn as_metric_value(self) -> i64 {
        match self {
            GatewaySyncState::Pending => 0,
            GatewaySyncState::Syncing => 1,
            GatewaySyncState::Synced => 2,
            GatewaySyncState::Error => 3,
            GatewaySyncState::MissingSidecar => 4,
        }
    }
}

/// A Kubernetes-convention condition: `⟨type, status, reason, message,
/// observedGeneration, lastTransitionTime⟩`. `last_transition_time` only
/// moves when `status` flips; `set` below encodes that rule.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition type name constants, so callers never hand-type strings.
pub mod condition_types {
    pub const READY: &str = "Ready";
    pub const PROFILES_VALID: &str = "ProfilesValid";
    pub const REF_RESOLVED: &str = "RefResolved";
    pub const SIDECAR_INJECTED: &str = "SidecarInjected";
    pub const ALL_GATEWAYS_SYNCED: &str = "AllGatewaysSynced";
    pub const SSH_HOST_KEY_VERIFICATION: &str = "SSHHostKeyVerification";
}

/// Applies `next` into `conditions`, preserving `last_transition_time` from
/// the existing entry of the same type when `status` is unchanged. Returns
/// `true` when the condition's status flipped (the caller uses this to
/// decide whether to emit a one-shot Kubernetes event).
pub fn set_condition(conditions: &mut Vec<Condition>, mut next: Condition) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == next.type_) {
        if existing.status == next.status {
            next.last_transition_time = existing.last_transition_time;
            *existing = next;
            return false;
        }
    }
    conditions.retain(|c| c.type_ != next.type_);
    conditions.push(next);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            type_: condition_types::READY.to_string(),
            status,
            reason: reason.to_string(),
            message: reason.to_string(),
            observed_generation: 1,
            last_transition_time: Utc::now(),
        }
    }

    #[test]
    fn transition_time_preserved_when_status_unchanged() {
        let mut conditions = vec![];
        let first = cond(ConditionStatus::True, "Ready");
        let t0 = first.last_transition_time;
        set_condition(&mut conditions, first);

        std::thread::sleep(std::time::Duration::from_millis(2));
        let flipped = set_condition(&mut conditions, cond(ConditionStatus::True, "StillReady"));
        assert!(!flipped);
        assert_eq!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].reason, "StillReady");
    }

    #[test]
    fn transition_time_updates_on_status_flip() {
        let mut conditions = vec![];
        set_condition(&mut conditions, cond(ConditionStatus::True, "Ready"));
        let flipped = set_condition(&mut conditions, cond(ConditionStatus::False, "NotReady"));
        assert!(flipped);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn auth_descriptor_type_names() {
        assert_eq!(AuthDescriptor::None.type_name(), "none");
        assert_eq!(
            AuthDescriptor::Token {
                secret_ref: SecretRef { name: "x".into(), key: None }
            }
            .type_name(),
            "token"
        );
    }
}
