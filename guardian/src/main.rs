// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Guardian node launcher.
//!
//! The binary keeps the deposit cache current and follows contract upgrades.
//! It ships no anomaly detector: pauses are requested by sending an `Anomaly`
//! on the channel handed to `run_guardian_node`, which embedders of the
//! `deposit_guardian` library wire to their own detection source. Without a
//! producer the node runs in observe-only mode.

use clap::Parser;
use deposit_guardian::config::GuardianNodeConfig;
use deposit_guardian::metrics::start_metrics_server;
use deposit_guardian::node::run_guardian_node;
use guardian_config::Config;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use tap::TapFallible;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const ANOMALY_CHANNEL_SIZE: usize = 64;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GuardianNodeConfig::load(&args.config_path)
        .tap_err(|e| error!("Failed to load config {:?}: {}", args.config_path, e))?;

    let prometheus_registry = prometheus::Registry::new();
    if let Some(port) = config.metrics_port {
        let metrics_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
        start_metrics_server(metrics_address, prometheus_registry.clone());
        info!("Metrics server started at port {}", port);
    }

    let cancel = CancellationToken::new();
    // No producer is attached here, the sender only keeps the channel open
    let (anomaly_tx, anomaly_rx) = mpsc::channel(ANOMALY_CHANNEL_SIZE);
    let handles = run_guardian_node(config, &prometheus_registry, anomaly_rx, cancel.clone())
        .await
        .tap_err(|e| error!("Guardian node failed to start: {:?}", e))?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    cancel.cancel();
    drop(anomaly_tx);
    for result in futures::future::join_all(handles).await {
        result.map_err(|e| anyhow::anyhow!("Task join error: {}", e))?;
    }
    Ok(())
}
