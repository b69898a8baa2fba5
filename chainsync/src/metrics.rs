// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::net::SocketAddr;

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10., 15., 20., 25.,
    30., 45., 60., 90., 120.,
];

pub const METRICS_PATH: &str = "/metrics";

#[derive(Clone, Debug)]
pub struct ChainSyncMetrics {
    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_node_connected: IntGauge,

    pub(crate) sync_passes: IntCounterVec,
    pub(crate) consecutive_pass_failures: IntGauge,
    pub(crate) last_synced_block: IntGauge,
    pub(crate) logs_fetched: IntCounter,
    pub(crate) decode_failures: IntCounter,

    pub(crate) escrows_recorded: IntCounter,
    pub(crate) launch_rejections: IntCounterVec,
    pub(crate) corroboration_failures: IntCounter,
    pub(crate) launch_tracker_size: IntGauge,

    pub(crate) inspection_failures: IntCounter,
    pub(crate) jobs_dispatched: IntCounter,
    pub(crate) dispatch_failures: IntCounter,
    pub(crate) escrows_awaiting_dispatch: IntGauge,

    pub(crate) errors: IntCounterVec,
}

impl ChainSyncMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "chainsync_eth_rpc_queries",
                "Total number of queries issued to the eth provider, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "chainsync_eth_rpc_queries_latency",
                "Latency of queries issued to the eth provider, by request type",
                &["type"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "chainsync_eth_node_connected",
                "Whether the last request to the eth node succeeded (1) or failed (0)",
                registry,
            )
            .unwrap(),
            sync_passes: register_int_counter_vec_with_registry!(
                "chainsync_sync_passes",
                "Total number of synchronization passes, by result",
                &["result"],
                registry,
            )
            .unwrap(),
            consecutive_pass_failures: register_int_gauge_with_registry!(
                "chainsync_consecutive_pass_failures",
                "Number of failed passes since the last successful one",
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_with_registry!(
                "chainsync_last_synced_block",
                "Upper bound of the last block range scanned successfully",
                registry,
            )
            .unwrap(),
            logs_fetched: register_int_counter_with_registry!(
                "chainsync_logs_fetched",
                "Total number of factory logs returned by the node",
                registry,
            )
            .unwrap(),
            decode_failures: register_int_counter_with_registry!(
                "chainsync_decode_failures",
                "Total number of logs that could not be decoded as Launched events",
                registry,
            )
            .unwrap(),
            escrows_recorded: register_int_counter_with_registry!(
                "chainsync_escrows_recorded",
                "Total number of escrows accepted by the launch tracker",
                registry,
            )
            .unwrap(),
            launch_rejections: register_int_counter_vec_with_registry!(
                "chainsync_launch_rejections",
                "Total number of Launched events not recorded, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            corroboration_failures: register_int_counter_with_registry!(
                "chainsync_corroboration_failures",
                "Total number of failed launcher lookups",
                registry,
            )
            .unwrap(),
            launch_tracker_size: register_int_gauge_with_registry!(
                "chainsync_launch_tracker_size",
                "Number of escrows held by the launch tracker",
                registry,
            )
            .unwrap(),
            inspection_failures: register_int_counter_with_registry!(
                "chainsync_inspection_failures",
                "Total number of escrows whose manifest or status could not be read",
                registry,
            )
            .unwrap(),
            jobs_dispatched: register_int_counter_with_registry!(
                "chainsync_jobs_dispatched",
                "Total number of escrow jobs accepted by the job sink",
                registry,
            )
            .unwrap(),
            dispatch_failures: register_int_counter_with_registry!(
                "chainsync_dispatch_failures",
                "Total number of escrow jobs rejected by the job sink",
                registry,
            )
            .unwrap(),
            escrows_awaiting_dispatch: register_int_gauge_with_registry!(
                "chainsync_escrows_awaiting_dispatch",
                "Number of recorded escrows re-inspected every pass until their job is dispatched",
                registry,
            )
            .unwrap(),
            errors: register_int_counter_vec_with_registry!(
                "chainsync_errors",
                "Total number of errors, by error type",
                &["type"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned()),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unable to encode metrics: {e}"),
        ),
    }
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(registry)
}

/// Serves `registry` on `address` until the process exits.
pub async fn start_metrics_server(
    address: SocketAddr,
    registry: Registry,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!("Metrics server listening on {}", listener.local_addr()?);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_router(registry)).await {
            tracing::error!("Metrics server error: {:?}", e);
        }
    }))
}
