//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! `/readyz` endpoint the pod's readiness probe depends on. Gated on the
//! first successful sync completing, so the gateway's readiness never
//! flips true before files are in place — the initial sync is blocking.
//! Built on `warp`, the same HTTP surface the operator uses for its own
//! `/metrics` endpoint.
//!
//! SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use warp::Filter;

#[derive(Clone, Default)]
pub struct ReadinessGate {
    ready: Arc<AtomicBool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub async fn run_readiness_server(gate: ReadinessGate, addr: std::net::SocketAddr) {
    let route = warp::path("readyz").and(warp::get()).and_then(move || {
        let gate = gate.clone();
        async move {
            if gate.is_ready() {
                Ok(warp::reply::with_status("ok", warp::http::StatusCode::OK))
            } else {
                Ok(warp::reply::with_status("initial sync not yet complete", warp::http::StatusCode::SERVICE_UNAVAILABLE))
            }
        }
    });
    info!(%addr, "starting readiness server");
    warp::serve(route).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ready_and_flips_once() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
        gate.mark_ready();
        assert!(gate.is_ready());
    }
}
