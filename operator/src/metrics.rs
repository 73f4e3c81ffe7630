//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Custom Prometheus metrics exposed by the operator, created once via
//! `lazy_static!` and registered at startup, mirroring the controller
//! manager's own metrics module.
//!
//! SPDX-License-Identifier: Apache-2.0

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{
    histogram_opts, opts, register_histogram, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntGaugeVec, Registry,
};

lazy_static! {
    pub static ref RECONCILES_TOTAL: prometheus::IntCounterVec = register_int_counter_vec!(
        "gatewaysync_reconciles_total",
        "Total reconcile revolutions, labeled by outcome.",
        &["result"]
    )
    .unwrap();

    pub static ref REF_RESOLVE_DURATION_SECONDS: Histogram = register_histogram!(histogram_opts!(
        "gatewaysync_ref_resolve_duration_seconds",
        "Time spent resolving the Git ref via LsRemote.",
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0]
    ))
    .unwrap();

    pub static ref RECONCILE_DURATION_SECONDS: Histogram = register_histogram!(histogram_opts!(
        "gatewaysync_reconcile_duration_seconds",
        "Time spent in one full reconcile revolution.",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]
    ))
    .unwrap();

    pub static ref DISCOVERED_GATEWAYS: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_discovered_gateways",
        "Number of gateway pods discovered for a GatewaySync record.",
        &["name", "namespace"]
    )
    .unwrap();

    pub static ref SYNCED_GATEWAYS: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_synced_gateways",
        "Number of gateway pods reporting Synced status.",
        &["name", "namespace"]
    )
    .unwrap();

    pub static ref MISSING_SIDECAR_GATEWAYS: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_missing_sidecar_gateways",
        "Number of gateway pods missing the stoker-agent sidecar.",
        &["name", "namespace"]
    )
    .unwrap();

    pub static ref CONDITION_STATUS: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_condition_status",
        "Condition status encoded 1=True, 0=False, -1=Unknown.",
        &["name", "namespace", "condition"]
    )
    .unwrap();

    pub static ref GATEWAY_SYNC_STATUS: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_gateway_sync_status",
        "Per-gateway sync status, small-int encoded.",
        &["name", "namespace", "gateway"]
    )
    .unwrap();

    pub static ref TOKEN_EXPIRY_TIMESTAMP_SECONDS: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_token_expiry_timestamp_seconds",
        "Unix timestamp at which a cached GitHub App installation token expires.",
        &["app_id", "installation_id"]
    )
    .unwrap();

    pub static ref PAUSED: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_paused",
        "1 if the record is paused, else 0.",
        &["name", "namespace"]
    )
    .unwrap();

    pub static ref READY: IntGaugeVec = register_int_gauge_vec!(
        "gatewaysync_ready",
        "1 if the Ready condition is True, else 0.",
        &["name", "namespace"]
    )
    .unwrap();

    pub static ref INFO: IntGaugeVec = register_int_gauge_vec!(
        opts!("gatewaysync_info", "Static info about a GatewaySync record, value pinned to 1."),
        &["name", "namespace", "git_repo", "git_ref", "auth_type", "polling_interval_seconds"]
    )
    .unwrap();
}

/// Registers every metric above into a fresh registry. Called once at
/// startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(RECONCILES_TOTAL.clone()))?;
    r.register(Box::new(REF_RESOLVE_DURATION_SECONDS.clone()))?;
    r.register(Box::new(RECONCILE_DURATION_SECONDS.clone()))?;
    r.register(Box::new(DISCOVERED_GATEWAYS.clone()))?;
    r.register(Box::new(SYNCED_GATEWAYS.clone()))?;
    r.register(Box::new(MISSING_SIDECAR_GATEWAYS.clone()))?;
    r.register(Box::new(CONDITION_STATUS.clone()))?;
    r.register(Box::new(GATEWAY_SYNC_STATUS.clone()))?;
    r.register(Box::new(TOKEN_EXPIRY_TIMESTAMP_SECONDS.clone()))?;
    r.register(Box::new(PAUSED.clone()))?;
    r.register(Box::new(READY.clone()))?;
    r.register(Box::new(INFO.clone()))?;
    Ok(r)
}

/// Deletes every label combination touching `name`/`namespace`. Called on
/// finalization so a deleted record leaves no stale series behind.
///
/// `GATEWAY_SYNC_STATUS` and `INFO` carry extra labels beyond `name`/
/// `namespace` (the per-pod gateway, and the six-field git/auth/polling
/// tuple respectively) whose values aren't known at finalization time, so
/// those two are purged by walking the live series each vec has collected
/// and removing every one whose `name`/`namespace` labels match, rather
/// than by guessing the remaining label values.
pub fn purge_record_metrics(name: &str, namespace: &str) {
    let _ = DISCOVERED_GATEWAYS.remove_label_values(&[name, namespace]);
    let _ = SYNCED_GATEWAYS.remove_label_values(&[name, namespace]);
    let _ = MISSING_SIDECAR_GATEWAYS.remove_label_values(&[name, namespace]);
    let _ = PAUSED.remove_label_values(&[name, namespace]);
    let _ = READY.remove_label_values(&[name, namespace]);
    for condition in [
        gatewaysync_api::condition_types::READY,
        gatewaysync_api::condition_types::PROFILES_VALID,
        gatewaysync_api::condition_types::REF_RESOLVED,
        gatewaysync_api::condition_types::SIDECAR_INJECTED,
        gatewaysync_api::condition_types::ALL_GATEWAYS_SYNCED,
        gatewaysync_api::condition_types::SSH_HOST_KEY_VERIFICATION,
    ] {
        let _ = CONDITION_STATUS.remove_label_values(&[name, namespace, condition]);
    }
    remove_matching_series(&GATEWAY_SYNC_STATUS, &["name", "namespace", "gateway"], name, namespace);
    remove_matching_series(
        &INFO,
        &["name", "namespace", "git_repo", "git_ref", "auth_type", "polling_interval_seconds"],
        name,
        namespace,
    );
}

/// Removes every series of `vec` whose `name`/`namespace` labels match,
/// regardless of what its remaining labels are set to. `label_names` must
/// be the vec's variable labels in the order they were declared in, since
/// `remove_label_values` matches positionally rather than by label name
/// and the proto's label list isn't guaranteed to preserve that order.
fn remove_matching_series(vec: &IntGaugeVec, label_names: &[&str], name: &str, namespace: &str) {
    for family in vec.collect() {
        for metric in family.get_metric() {
            let labels = metric.get_label();
            let label_value = |key: &str| labels.iter().find(|l| l.get_name() == key).map(|l| l.get_value());
            if label_value("name") != Some(name) || label_value("namespace") != Some(namespace) {
                continue;
            }
            let values: Vec<&str> = label_names.iter().map(|key| label_value(key).unwrap_or("")).collect();
            let _ = vec.remove_label_values(&values);
        }
    }
}
