//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! The protocol by which the control loop and agent sidecars exchange
//! commits and statuses, using plain `ConfigMap` objects as the sole
//! transport, applied via server-side-apply the same way as every other
//! object this workspace writes.
//!
//! SPDX-License-Identifier: Apache-2.0

use futures::Stream;
use gatewaysync_api::{DiscoveredGateway, GatewaySync};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::{Client, Resource, ResourceExt};
use profile_resolver::ResolvedProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

const FIELD_MANAGER: &str = "gatewaysync-operator.sync.stoker.io";
const MAX_STATUS_WRITE_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("GatewaySync has no owner reference (is it being created?)")]
    MissingOwnerRef,
    #[error("status record write exhausted {MAX_STATUS_WRITE_RETRIES} CAS retries")]
    ConflictExhausted,
}

pub fn metadata_record_name(gatewaysync_name: &str) -> String {
    format!("{gatewaysync_name}-metadata")
}

pub fn status_record_name(gatewaysync_name: &str) -> String {
    format!("{gatewaysync_name}-status")
}

/// The controller→agents document: resolved commit/ref, connection info,
/// and every profile with defaults already merged in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub commit: String,
    pub git_ref: String,
    pub git_url: String,
    pub auth_type: String,
    pub paused: bool,
    pub gateway_port: u16,
    pub gateway_tls: bool,
    pub profiles: BTreeMap<String, ResolvedProfile>,
}

impl MetadataRecord {
    fn to_data_map(&self) -> Result<BTreeMap<String, String>, Error> {
        let mut map = BTreeMap::new();
        map.insert("commit".to_string(), self.commit.clone());
        map.insert("ref".to_string(), self.git_ref.clone());
        map.insert("gitURL".to_string(), self.git_url.clone());
        map.insert("authType".to_string(), self.auth_type.clone());
        map.insert("paused".to_string(), self.paused.to_string());
        map.insert("gatewayPort".to_string(), self.gateway_port.to_string());
        map.insert("gatewayTLS".to_string(), self.gateway_tls.to_string());
        map.insert("profiles".to_string(), serde_json::to_string(&self.profiles)?);
        Ok(map)
    }

    pub fn from_data_map(data: &BTreeMap<String, String>) -> Result<Self, Error> {
        let get = |k: &str| data.get(k).cloned().unwrap_or_default();
        Ok(MetadataRecord {
            commit: get("commit"),
            git_ref: get("ref"),
            git_url: get("gitURL"),
            auth_type: get("authType"),
            paused: get("paused") == "true",
            gateway_port: get("gatewayPort").parse().unwrap_or(0),
            gateway_tls: get("gatewayTLS") == "true",
            profiles: data
                .get("profiles")
                .map(|raw| serde_json::from_str(raw))
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// Idempotent write: only patches the record when its data differs from
/// what's already there. Owned by the GatewaySync (garbage-collected with
/// it via the owner reference).
pub async fn write_metadata_record(
    client: &Client,
    namespace: &str,
    owner: &GatewaySync,
    desired: &MetadataRecord,
) -> Result<bool, Error> {
    let name = metadata_record_name(&owner.name_any());
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let desired_data = desired.to_data_map()?;

    if let Some(current) = api.get_opt(&name).await? {
        if current.data.as_ref() == Some(&desired_data) {
            return Ok(false);
        }
    }

    let owner_ref = owner
        .controller_owner_ref(&())
        .ok_or(Error::MissingOwnerRef)?;

    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        data: Some(desired_data),
        ..Default::default()
    };

    api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&cm)).await?;
    Ok(true)
}

/// Fetches the metadata record an agent reads every trigger. Returns `None`
/// if the controller has not yet resolved a ref for this record (no
/// metadata record has ever been written).
pub async fn read_metadata_record(
    client: &Client,
    namespace: &str,
    gatewaysync_name: &str,
) -> Result<Option<MetadataRecord>, Error> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let name = metadata_record_name(gatewaysync_name);
    match api.get_opt(&name).await?.and_then(|cm| cm.data) {
        Some(data) => Ok(Some(MetadataRecord::from_data_map(&data)?)),
        None => Ok(None),
    }
}

/// A scoped watch on the metadata record: the agent's fallback-timer-plus-watch
/// trigger channel selects on this stream alongside a timer and SIGTERM.
/// Scoped via a field selector on the well-known name so one agent's watch
/// never wakes on another GatewaySync's metadata record in the same
/// namespace.
pub fn watch_metadata_record(
    client: Client,
    namespace: &str,
    gatewaysync_name: &str,
) -> impl Stream<Item = Result<Event<ConfigMap>, watcher::Error>> {
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let name = metadata_record_name(gatewaysync_name);
    let cfg = WatcherConfig::default().fields(&format!("metadata.name={name}"));
    watcher::watcher(api, cfg)
}

/// Fetches the status record by well-known name. Returns an empty map if
/// the record has never been written (no agent has synced yet).
pub async fn read_status_record(
    client: &Client,
    namespace: &str,
    gatewaysync_name: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let name = status_record_name(gatewaysync_name);
    Ok(api.get_opt(&name).await?.and_then(|cm| cm.data).unwrap_or_default())
}

/// Parses one status row. Parse failures are the caller's responsibility
/// to log and fall back to the Pending default — this function only
/// reports the error.
pub fn parse_status_row(raw: &str) -> Result<DiscoveredGateway, Error> {
    Ok(serde_json::from_str(raw)?)
}

/// Looks up a gateway's row by pod name first, falling back to gateway
/// display name, matching the reconciler's key-resolution order.
pub fn lookup_row<'a>(
    rows: &'a BTreeMap<String, String>,
    pod_name: &str,
    display_name: &str,
) -> Option<&'a str> {
    rows.get(pod_name)
        .or_else(|| rows.get(display_name))
        .map(String::as_str)
}

/// Writes (or creates) the caller's own row in the status record under
/// optimistic concurrency: fetch, merge, write back; on a resource-version
/// conflict, re-fetch and retry up to `MAX_STATUS_WRITE_RETRIES` times.
pub async fn write_own_status_row(
    client: &Client,
    namespace: &str,
    gatewaysync_name: &str,
    gateway_key: &str,
    row: &DiscoveredGateway,
) -> Result<(), Error> {
    let name = status_record_name(gatewaysync_name);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let row_json = serde_json::to_string(row)?;

    for attempt in 0..MAX_STATUS_WRITE_RETRIES {
        match api.get_opt(&name).await? {
            None => {
                let mut data = BTreeMap::new();
                data.insert(gateway_key.to_string(), row_json.clone());
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                match api.create(&PostParams::default(), &cm).await {
                    Ok(_) => return Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        warn!(attempt, "status record created concurrently, retrying");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(mut cm) => {
                let mut data = cm.data.take().unwrap_or_default();
                data.insert(gateway_key.to_string(), row_json.clone());
                cm.data = Some(data);
                let name = cm.name_any();
                match api.replace(&name, &PostParams::default(), &cm).await {
                    Ok(_) => return Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        warn!(attempt, gateway_key, "status row write conflict, retrying");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    Err(Error::ConflictExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_record_round_trips_through_data_map() {
        let record = MetadataRecord {
            commit: "abc123".to_string(),
            git_ref: "main".to_string(),
            git_url: "https://example.invalid/repo.git".to_string(),
            auth_type: "token".to_string(),
            paused: false,
            gateway_port: 8088,
            gateway_tls: true,
            profiles: BTreeMap::new(),
        };

        let data = record.to_data_map().unwrap();
        let round_tripped = MetadataRecord::from_data_map(&data).unwrap();
        assert_eq!(record, round_tripped);
    }

    #[test]
    fn lookup_prefers_pod_name_over_display_name() {
        let mut rows = BTreeMap::new();
        rows.insert("gw-pod-abc".to_string(), "pod-row".to_string());
        rows.insert("gw-display".to_string(), "display-row".to_string());

        assert_eq!(lookup_row(&rows, "gw-pod-abc", "gw-display"), Some("pod-row"));
        assert_eq!(lookup_row(&rows, "missing-pod", "gw-display"), Some("display-row"));
        assert_eq!(lookup_row(&rows, "missing-pod", "missing-display"), None);
    }
}
