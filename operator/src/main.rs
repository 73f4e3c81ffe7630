//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Entry point for the GatewaySync controller process: initializes
//! telemetry, builds the Kubernetes client, runs the Controller watch loop
//! bounded to `STOKER_MAX_CONCURRENT_RECONCILES` parallel revolutions, and
//! serves the Prometheus `/metrics` endpoint via a `tokio::join!` of the
//! controller run loop and the metrics server.
//!
//! SPDX-License-Identifier: Apache-2.0

mod backoff;
mod context;
mod derived_secret;
mod events;
mod metrics;
mod rbac;
mod ref_cache;
mod reconcile;

use context::Context;
use futures::stream::StreamExt;
use gatewaysync_api::GatewaySync;
use kube::runtime::Controller;
use kube::{Api, Client};
use opentelemetry::global;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 5;

fn init_telemetry() -> anyhow::Result<()> {
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name("gatewaysync-operator")
        .install_batch(opentelemetry::runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    tracing_subscriber::registry().with(filter).with(telemetry).with(fmt_layer).try_init()?;
    Ok(())
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer).expect("metric families must encode");
    Ok(warp::reply::with_header(
        String::from_utf8(buffer).expect("prometheus text format is valid utf-8"),
        "Content-Type",
        encoder.format_type(),
    ))
}

async fn run_metrics_server(registry: Arc<Registry>, addr: std::net::SocketAddr) {
    use warp::Filter;
    let route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler);
    info!(%addr, "starting metrics server");
    warp::serve(route).run(addr).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry()?;
    info!("telemetry initialized");

    let client = Client::try_default().await?;
    let rbac_auto_bind = std::env::var("STOKER_RBAC_AUTO_BIND")
        .map(|v| v != "false")
        .unwrap_or(true);
    let ctx = Arc::new(Context::new(client.clone(), rbac_auto_bind));

    let registry = Arc::new(metrics::create_and_register_metrics()?);
    info!("metrics registered");

    let metrics_addr: std::net::SocketAddr = std::env::var("STOKER_METRICS_ADDR")
        .unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string())
        .parse()?;

    let max_concurrent: usize = std::env::var("STOKER_MAX_CONCURRENT_RECONCILES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_RECONCILES);

    let records: Api<GatewaySync> = Api::all(client.clone());

    info!("gatewaysync-operator starting");

    tokio::join!(
        run_metrics_server(registry.clone(), metrics_addr),
        Controller::new(records, Default::default())
            .shutdown_on_signal()
            .run(reconcile::reconcile, reconcile::on_error, ctx)
            .for_each_concurrent(max_concurrent, |res| async move {
                match res {
                    Ok((obj_ref, action)) => info!(gatewaysync = %obj_ref.name, ?action, "reconciled"),
                    Err(err) => error!(%err, "reconcile stream error"),
                }
            }),
    );

    info!("gatewaysync-operator shutting down");
    global::shutdown_tracer_provider();
    Ok(())
}
