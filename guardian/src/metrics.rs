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
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.4, 0.5, 0.7, 1.0, 1.5, 2.0, 3.0, 5.0,
    7.5, 10., 15., 20., 30., 45., 60.,
];

#[derive(Clone, Debug)]
pub struct GuardianMetrics {
    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_rpc_rate_limited: IntCounterVec,
    pub(crate) eth_node_connected: IntGauge,

    pub(crate) last_observed_block: IntGauge,
    pub(crate) deposit_cache_end_block: IntGauge,
    pub(crate) deposit_cache_events: IntGauge,
    pub(crate) deposit_fetch_retries: IntCounterVec,
    pub(crate) deposit_range_splits: IntCounter,

    pub(crate) single_flight_dropped: IntCounterVec,
    pub(crate) contract_address_changes: IntCounterVec,
    pub(crate) attestations_signed: IntCounterVec,

    pub(crate) pause_outcomes: IntCounterVec,
    pub(crate) err_pause_submission: IntCounter,
}

impl GuardianMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "guardian_eth_rpc_queries",
                "Total number of queries issued to eth provider, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "guardian_eth_rpc_queries_latency",
                "Latency of queries issued to eth provider, by request type",
                &["type"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_rpc_rate_limited: register_int_counter_vec_with_registry!(
                "guardian_eth_rpc_rate_limited",
                "Total number of eth provider responses classified as rate limited",
                &["type"],
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "guardian_eth_node_connected",
                "Whether the last eth provider request succeeded (1) or failed (0)",
                registry,
            )
            .unwrap(),
            last_observed_block: register_int_gauge_with_registry!(
                "guardian_last_observed_block",
                "Latest block number seen by the block watcher",
                registry,
            )
            .unwrap(),
            deposit_cache_end_block: register_int_gauge_with_registry!(
                "guardian_deposit_cache_end_block",
                "Last block covered by the persisted deposit event cache",
                registry,
            )
            .unwrap(),
            deposit_cache_events: register_int_gauge_with_registry!(
                "guardian_deposit_cache_events",
                "Number of deposit events in the persisted cache",
                registry,
            )
            .unwrap(),
            deposit_fetch_retries: register_int_counter_vec_with_registry!(
                "guardian_deposit_fetch_retries",
                "Total number of deposit log fetch retries, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            deposit_range_splits: register_int_counter_with_registry!(
                "guardian_deposit_range_splits",
                "Total number of deposit log ranges split after a rate limit",
                registry,
            )
            .unwrap(),
            single_flight_dropped: register_int_counter_vec_with_registry!(
                "guardian_single_flight_dropped",
                "Total number of calls dropped because the operation was in flight",
                &["operation"],
                registry,
            )
            .unwrap(),
            contract_address_changes: register_int_counter_vec_with_registry!(
                "guardian_contract_address_changes",
                "Total number of observed contract address changes, by role",
                &["role"],
                registry,
            )
            .unwrap(),
            attestations_signed: register_int_counter_vec_with_registry!(
                "guardian_attestations_signed",
                "Total number of attestations signed, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            pause_outcomes: register_int_counter_vec_with_registry!(
                "guardian_pause_outcomes",
                "Total number of pause attempts, by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
            err_pause_submission: register_int_counter_with_registry!(
                "guardian_err_pause_submission",
                "Total number of failed pause submissions",
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

/// Serve the registry in text format on `/metrics`.
pub fn start_metrics_server(
    address: SocketAddr,
    registry: Registry,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let router = Router::new()
            .route("/", get(health_check))
            .route("/metrics", get(metrics_handler))
            .with_state(registry);
        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Failed to bind metrics server on {}: {:?}", address, e);
                return;
            }
        };
        tracing::info!("Metrics server listening on {}", address);
        if let Err(e) = axum::serve(listener, router.into_make_service()).await {
            tracing::error!("Metrics server stopped: {:?}", e);
        }
    })
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn metrics_handler(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buffer = vec![];
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
