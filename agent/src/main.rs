//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Entry point for the sidecar agent process. Three independent triggers
//! — a watch on the metadata record, a fallback timer, and SIGTERM — feed
//! a single `tokio::sync::Notify`, so overlapping wake-ups coalesce into
//! at most one queued follow-up sync rather than stacking concurrent
//! runs against the same staging directory. Shaped after
//! `operator::main`'s `tokio::join!` of a metrics server and a watch
//! loop, minus the `Controller` machinery this process doesn't need.
//!
//! SPDX-License-Identifier: Apache-2.0

mod credentials;
mod identity;
mod readiness;
mod sync_loop;

use futures::StreamExt;
use identity::AgentIdentity;
use kube::Client;
use readiness::{run_readiness_server, ReadinessGate};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sync_loop::{SyncOutcome, SyncState};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FALLBACK_SYNC_PERIOD_SECONDS: u64 = 30;
const GRACEFUL_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();
    info!("telemetry initialized");

    let identity = AgentIdentity::from_env()?;
    info!(pod = %identity.pod_name, gateway = %identity.gateway_name, "stoker-agent starting");

    let client = Client::try_default().await?;
    let gate = ReadinessGate::new();

    let readiness_addr: SocketAddr = identity.readiness_addr.parse()?;
    tokio::spawn(run_readiness_server(gate.clone(), readiness_addr));

    let trigger = Arc::new(Notify::new());

    let fallback_period = std::env::var("STOKER_FALLBACK_SYNC_PERIOD_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_FALLBACK_SYNC_PERIOD_SECONDS));
    tokio::spawn(run_fallback_timer(trigger.clone(), fallback_period));
    tokio::spawn(run_metadata_watch(
        client.clone(),
        identity.namespace.clone(),
        identity.gatewaysync_name.clone(),
        trigger.clone(),
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut state = SyncState::default();

    info!("stoker-agent entering trigger loop");

    loop {
        tokio::select! {
            _ = trigger.notified() => {
                let selectors = identity::read_live_selectors(&identity.annotations_path);
                let sync_future = sync_loop::run_one(&client, &identity, &selectors, &mut state);
                tokio::pin!(sync_future);

                tokio::select! {
                    outcome = &mut sync_future => handle_outcome(outcome, &gate),
                    _ = sigterm.recv() => {
                        warn!("SIGTERM received mid-sync, waiting up to 30s for it to finish");
                        match tokio::time::timeout(GRACEFUL_SHUTDOWN_DEADLINE, sync_future).await {
                            Ok(outcome) => handle_outcome(outcome, &gate),
                            Err(_) => error!("sync did not finish within the shutdown deadline, exiting anyway"),
                        }
                        break;
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, no sync in flight, shutting down immediately");
                break;
            }
        }
    }

    info!("stoker-agent shutting down");
    Ok(())
}

fn handle_outcome(outcome: SyncOutcome, gate: &ReadinessGate) {
    match outcome {
        SyncOutcome::Synced { result, first_sync } => {
            gate.mark_ready();
            info!(
                added = result.added,
                modified = result.modified,
                deleted = result.deleted,
                first_sync,
                "sync revolution complete"
            );
        }
        SyncOutcome::Skipped(reason) => info!(reason, "sync skipped"),
        SyncOutcome::Failed(message) => warn!(%message, "sync failed"),
    }
}

async fn run_fallback_timer(trigger: Arc<Notify>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        trigger.notify_one();
    }
}

/// Forwards every metadata-record watch event into the trigger channel.
/// A watch error is logged and the stream keeps running — `kube`'s
/// watcher already retries the underlying list/watch internally.
async fn run_metadata_watch(client: Client, namespace: String, gatewaysync_name: String, trigger: Arc<Notify>) {
    let mut stream = Box::pin(signaling::watch_metadata_record(client, &namespace, &gatewaysync_name));
    while let Some(event) = stream.next().await {
        match event {
            Ok(_) => trigger.notify_one(),
            Err(err) => warn!(%err, "metadata record watch error"),
        }
    }
}
