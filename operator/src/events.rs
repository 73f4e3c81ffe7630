//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Thin wrapper over `kube::runtime::events::Recorder` for the Kubernetes
//! events named in the external-interfaces section: `Paused`,
//! `GatewaysDiscovered`, `SidecarMissing`, `RefResolutionFailed`, profile
//! validation outcomes, RBAC errors. Every call site only fires on a
//! distinct transition (a `bool` returned by `set_condition`, or an
//! explicit before/after comparison), never on every repeated revolution.
//!
//! SPDX-License-Identifier: Apache-2.0

use gatewaysync_api::GatewaySync;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

pub fn reporter() -> Reporter {
    Reporter {
        controller: "gatewaysync-operator".into(),
        instance: std::env::var("HOSTNAME").ok(),
    }
}

async fn publish(client: &Client, gs: &GatewaySync, reporter: Reporter, event: Event) {
    let recorder = Recorder::new(client.clone(), reporter, gs.object_ref(&()));
    if let Err(err) = recorder.publish(&event).await {
        tracing::warn!(error = %err, reason = %event.reason, "failed to publish event");
    }
}

pub async fn paused(client: &Client, gs: &GatewaySync, reporter: Reporter) {
    publish(
        client,
        gs,
        reporter,
        Event {
            type_: EventType::Normal,
            reason: "Paused".into(),
            note: Some("GatewaySync is paused, reconciliation is a no-op".into()),
            action: "Reconciling".into(),
            secondary: None,
        },
    )
    .await;
}

pub async fn gateways_discovered(client: &Client, gs: &GatewaySync, reporter: Reporter, count: usize) {
    publish(
        client,
        gs,
        reporter,
        Event {
            type_: EventType::Normal,
            reason: "GatewaysDiscovered".into(),
            note: Some(format!("discovered {count} gateway pod(s)")),
            action: "Discovering".into(),
            secondary: None,
        },
    )
    .await;
}

pub async fn sidecar_missing(client: &Client, gs: &GatewaySync, reporter: Reporter, pod_name: &str) {
    publish(
        client,
        gs,
        reporter,
        Event {
            type_: EventType::Warning,
            reason: "SidecarMissing".into(),
            note: Some(format!("pod '{pod_name}' is annotated for injection but has no stoker-agent init container")),
            action: "Discovering".into(),
            secondary: None,
        },
    )
    .await;
}

pub async fn ref_resolution_failed(client: &Client, gs: &GatewaySync, reporter: Reporter, message: &str) {
    publish(
        client,
        gs,
        reporter,
        Event {
            type_: EventType::Warning,
            reason: "RefResolutionFailed".into(),
            note: Some(message.to_string()),
            action: "ResolvingRef".into(),
            secondary: None,
        },
    )
    .await;
}

pub async fn profiles_invalid(client: &Client, gs: &GatewaySync, reporter: Reporter, message: &str) {
    publish(
        client,
        gs,
        reporter,
        Event {
            type_: EventType::Warning,
            reason: "ProfilesInvalid".into(),
            note: Some(message.to_string()),
            action: "ValidatingProfiles".into(),
            secondary: None,
        },
    )
    .await;
}

pub async fn rbac_error(client: &Client, gs: &GatewaySync, reporter: Reporter, service_account: &str, message: &str) {
    publish(
        client,
        gs,
        reporter,
        Event {
            type_: EventType::Warning,
            reason: "RbacBindError".into(),
            note: Some(format!("binding for service account '{service_account}' failed: {message}")),
            action: "BindingRbac".into(),
            secondary: None,
        },
    )
    .await;
}
