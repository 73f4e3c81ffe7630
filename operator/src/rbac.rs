//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Auto-binds a gateway pod's service account to the fixed `ClusterRole`
//! that lets it read its own metadata/status records, via the same
//! server-side-apply `RoleBinding` idiom used everywhere else this
//! workspace manages RBAC objects.
//!
//! SPDX-License-Identifier: Apache-2.0

use gatewaysync_api::GatewaySync;
use k8s_openapi::api::rbac::v1 as rbac;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use thiserror::Error;

const FIELD_MANAGER: &str = "gatewaysync-operator.sync.stoker.io";
const AGENT_CLUSTER_ROLE: &str = "stoker-agent-reader";

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("GatewaySync has no owner reference")]
    MissingOwnerRef,
}

/// Whether `ensure_agent_role_binding` created a binding that did not exist
/// before, or left an already-correct one untouched. The caller uses this
/// to emit exactly one audit event per binding, not one per revolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOutcome {
    Created,
    Unchanged,
}

/// Idempotently ensures a `RoleBinding` exists in `namespace` granting
/// `service_account` the `stoker-agent-reader` ClusterRole. Safe to call every
/// revolution: server-side apply is a no-op when the desired object is
/// unchanged.
pub async fn ensure_agent_role_binding(
    client: &Client,
    owner: &GatewaySync,
    namespace: &str,
    service_account: &str,
) -> Result<BindingOutcome, Error> {
    let bindings: Api<rbac::RoleBinding> = Api::namespaced(client.clone(), namespace);
    let owner_ref = owner.controller_owner_ref(&()).ok_or(Error::MissingOwnerRef)?;
    // Keyed on the service account, not just the owning record: distinct
    // gateway candidates can run under distinct service accounts, and
    // `subjects` below is a single-element list under one field manager,
    // so two service accounts sharing a binding name would clobber each
    // other's subject on alternating applies.
    let binding_name = format!("gatewaysync-{}-{}-agent", owner.name_any(), service_account);

    let already_exists = bindings.get_opt(&binding_name).await?.is_some();

    let desired = rbac::RoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        role_ref: rbac::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: AGENT_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![rbac::Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            api_group: None,
        }]),
    };

    bindings
        .patch(&binding_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired))
        .await?;

    Ok(if already_exists { BindingOutcome::Unchanged } else { BindingOutcome::Created })
}
