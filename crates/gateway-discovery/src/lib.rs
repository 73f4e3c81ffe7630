//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Lists pods annotated for one GatewaySync and classifies each as
//! synced/pending/missing-sidecar. Never creates or mutates pods — it only
//! reads annotations and phase, mirroring the read-only enumeration style of
//! the cluster-info listing helpers.
//!
//! SPDX-License-Identifier: Apache-2.0

use gatewaysync_api::{DiscoveredGateway, GatewaySyncState};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use thiserror::Error;
use tracing::warn;

pub const ANNOTATION_CR_NAME: &str = "sync.stoker.io/cr-name";
pub const ANNOTATION_GATEWAY_NAME: &str = "sync.stoker.io/gateway-name";
pub const ANNOTATION_PROFILE: &str = "sync.stoker.io/profile";
pub const ANNOTATION_REF_OVERRIDE: &str = "sync.stoker.io/ref-override";
pub const ANNOTATION_INJECT: &str = "sync.stoker.io/inject";
const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
const SIDECAR_CONTAINER_NAME: &str = "stoker-agent";

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// One candidate pod found by namespace enumeration, before merging with the
/// agent's own status row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub pod_name: String,
    pub namespace: String,
    pub display_name: String,
    pub profile: Option<String>,
    pub ref_override: Option<String>,
    pub missing_sidecar: bool,
    pub service_account: String,
}

/// Enumerates every pod in `namespace` whose `cr-name` annotation matches
/// `gatewaysync_name` and whose phase is `Running`. Pods lacking the
/// annotation, or not yet running, are skipped entirely — they are not yet
/// part of this GatewaySync's observed state.
pub async fn discover(
    client: &Client,
    namespace: &str,
    gatewaysync_name: &str,
) -> Result<Vec<Candidate>, Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api.list(&ListParams::default()).await?;

    let mut candidates = Vec::new();
    for pod in pods.items {
        let Some(candidate) = classify(&pod, gatewaysync_name) else {
            continue;
        };
        if candidate.missing_sidecar {
            warn!(
                pod = candidate.pod_name,
                namespace, "pod annotated inject=true but stoker-agent init container absent"
            );
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}

fn classify(pod: &Pod, gatewaysync_name: &str) -> Option<Candidate> {
    let meta = &pod.metadata;
    let annotations = meta.annotations.as_ref()?;

    if annotations.get(ANNOTATION_CR_NAME).map(String::as_str) != Some(gatewaysync_name) {
        return None;
    }

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");
    if phase != "Running" {
        return None;
    }

    let pod_name = meta.name.clone()?;
    let namespace = meta.namespace.clone().unwrap_or_default();

    let display_name = annotations
        .get(ANNOTATION_GATEWAY_NAME)
        .cloned()
        .or_else(|| meta.labels.as_ref()?.get(LABEL_APP_NAME).cloned())
        .unwrap_or_else(|| pod_name.clone());

    let profile = annotations.get(ANNOTATION_PROFILE).cloned();
    let ref_override = annotations.get(ANNOTATION_REF_OVERRIDE).cloned();

    let inject_requested = annotations
        .get(ANNOTATION_INJECT)
        .map(|v| v == "true")
        .unwrap_or(false);
    let has_sidecar = pod
        .spec
        .as_ref()
        .and_then(|s| s.init_containers.as_ref())
        .map(|containers| containers.iter().any(|c| c.name == SIDECAR_CONTAINER_NAME))
        .unwrap_or(false);
    let missing_sidecar = inject_requested && !has_sidecar;
    let service_account = pod
        .spec
        .as_ref()
        .and_then(|s| s.service_account_name.clone())
        .unwrap_or_else(|| "default".to_string());

    Some(Candidate {
        pod_name,
        namespace,
        display_name,
        profile,
        ref_override,
        missing_sidecar,
        service_account,
    })
}

/// Merges enumerated candidates with the status-record rows the agents have
/// written for themselves. A candidate with no matching row is reported
/// `Pending` (not yet synced) unless it is `MissingSidecar`, which always
/// wins regardless of any stale row left over from before the pod restarted.
pub fn merge_with_status_row(candidate: &Candidate, row: Option<DiscoveredGateway>) -> DiscoveredGateway {
    if candidate.missing_sidecar {
        return DiscoveredGateway {
            name: candidate.display_name.clone(),
            namespace: candidate.namespace.clone(),
            pod_name: candidate.pod_name.clone(),
            profile: candidate.profile.clone(),
            sync_status: GatewaySyncState::MissingSidecar,
            ..Default::default()
        };
    }

    let mut entry = row.unwrap_or_default();
    entry.name = candidate.display_name.clone();
    entry.namespace = candidate.namespace.clone();
    entry.pod_name = candidate.pod_name.clone();
    entry.profile = candidate.profile.clone();
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod_with(annotations: BTreeMap<String, String>, phase: &str, init_containers: Option<Vec<Container>>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("gw-pod-1".to_string()),
                namespace: Some("demo".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                init_containers,
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn non_matching_cr_name_is_skipped() {
        let mut ann = BTreeMap::new();
        ann.insert(ANNOTATION_CR_NAME.to_string(), "other-gatewaysync".to_string());
        let pod = pod_with(ann, "Running", None);
        assert!(classify(&pod, "demo-gatewaysync").is_none());
    }

    #[test]
    fn non_running_phase_is_skipped() {
        let mut ann = BTreeMap::new();
        ann.insert(ANNOTATION_CR_NAME.to_string(), "demo-gatewaysync".to_string());
        let pod = pod_with(ann, "Pending", None);
        assert!(classify(&pod, "demo-gatewaysync").is_none());
    }

    #[test]
    fn inject_true_without_sidecar_is_missing() {
        let mut ann = BTreeMap::new();
        ann.insert(ANNOTATION_CR_NAME.to_string(), "demo-gatewaysync".to_string());
        ann.insert(ANNOTATION_INJECT.to_string(), "true".to_string());
        let pod = pod_with(ann, "Running", None);
        let candidate = classify(&pod, "demo-gatewaysync").unwrap();
        assert!(candidate.missing_sidecar);
    }

    #[test]
    fn inject_true_with_sidecar_present_is_not_missing() {
        let mut ann = BTreeMap::new();
        ann.insert(ANNOTATION_CR_NAME.to_string(), "demo-gatewaysync".to_string());
        ann.insert(ANNOTATION_INJECT.to_string(), "true".to_string());
        let sidecar = Container {
            name: SIDECAR_CONTAINER_NAME.to_string(),
            ..Default::default()
        };
        let pod = pod_with(ann, "Running", Some(vec![sidecar]));
        let candidate = classify(&pod, "demo-gatewaysync").unwrap();
        assert!(!candidate.missing_sidecar);
    }

    #[test]
    fn display_name_falls_back_to_pod_name() {
        let mut ann = BTreeMap::new();
        ann.insert(ANNOTATION_CR_NAME.to_string(), "demo-gatewaysync".to_string());
        let pod = pod_with(ann, "Running", None);
        let candidate = classify(&pod, "demo-gatewaysync").unwrap();
        assert_eq!(candidate.display_name, "gw-pod-1");
    }

    #[test]
    fn missing_sidecar_overrides_stale_status_row() {
        let candidate = Candidate {
            pod_name: "gw-pod-1".to_string(),
            namespace: "demo".to_string(),
            display_name: "gw-pod-1".to_string(),
            profile: None,
            ref_override: None,
            missing_sidecar: true,
            service_account: "default".to_string(),
        };
        let stale_row = DiscoveredGateway {
            sync_status: GatewaySyncState::Synced,
            ..Default::default()
        };
        let merged = merge_with_status_row(&candidate, Some(stale_row));
        assert_eq!(merged.sync_status, GatewaySyncState::MissingSidecar);
    }
}
