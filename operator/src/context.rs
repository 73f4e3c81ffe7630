//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Shared state handed to every reconcile invocation: the Kubernetes
//! client, the per-record backoff map, the ref-resolution cache, and the
//! GitHub App token cache — mirroring the single `Context { client }`
//! struct the controller manager passes to each of its controllers,
//! widened here to the extra caches this reconciler needs.
//!
//! SPDX-License-Identifier: Apache-2.0

use crate::backoff::BackoffMap;
use crate::ref_cache::RefCache;
use git_client::AppTokenCache;
use kube::runtime::events::Reporter;
use kube::Client;

pub struct Context {
    pub client: Client,
    pub backoff: BackoffMap,
    pub ref_cache: RefCache,
    pub token_cache: AppTokenCache,
    pub rbac_auto_bind: bool,
    pub reporter: Reporter,
}

impl Context {
    pub fn new(client: Client, rbac_auto_bind: bool) -> Self {
        Context {
            client,
            backoff: BackoffMap::new(),
            ref_cache: RefCache::new(),
            token_cache: AppTokenCache::new(),
            rbac_auto_bind,
            reporter: crate::events::reporter(),
        }
    }
}
