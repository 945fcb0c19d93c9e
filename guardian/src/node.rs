// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::ChainClient;
use crate::config::{GuardianNodeConfig, GuardianServerConfig};
use crate::contracts::{ContractRegistry, ContractRole};
use crate::deposits::DepositEventIngester;
use crate::error::GuardianResult;
use crate::metrics::GuardianMetrics;
use crate::pause::PauseCoordinator;
use crate::signing::AttestationSigner;
use crate::types::Anomaly;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Validates `config` and starts the node. Every `Anomaly` sent on the
/// sender paired with `anomalies` runs the pause coordinator.
pub async fn run_guardian_node(
    config: GuardianNodeConfig,
    prometheus_registry: &prometheus::Registry,
    anomalies: mpsc::Receiver<Anomaly>,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let metrics = Arc::new(GuardianMetrics::new(prometheus_registry));
    let server_config = config.validate(metrics.clone()).await?;
    let node = GuardianNode::from_server_config(server_config, Some(metrics));
    Ok(node.start(anomalies, cancel).await?)
}

pub struct GuardianNode {
    chain: Arc<dyn ChainClient>,
    registry: Arc<ContractRegistry>,
    ingester: Arc<DepositEventIngester>,
    coordinator: Arc<PauseCoordinator>,
    poll_interval: Duration,
    metrics: Option<Arc<GuardianMetrics>>,
}

impl GuardianNode {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<ContractRegistry>,
        ingester: Arc<DepositEventIngester>,
        coordinator: Arc<PauseCoordinator>,
        poll_interval: Duration,
        metrics: Option<Arc<GuardianMetrics>>,
    ) -> Self {
        Self {
            chain,
            registry,
            ingester,
            coordinator,
            poll_interval,
            metrics,
        }
    }

    pub fn from_server_config(
        config: GuardianServerConfig,
        metrics: Option<Arc<GuardianMetrics>>,
    ) -> Self {
        let registry = Arc::new(
            ContractRegistry::new(config.locator).with_metrics(metrics.clone()),
        );
        let ingester = Arc::new(
            DepositEventIngester::new(
                config.chain.clone(),
                config.cache_store,
                registry.clone(),
                config.ingester_config,
                config.deployment_block,
            )
            .with_metrics(metrics.clone()),
        );
        let signer = Arc::new(
            AttestationSigner::new(config.wallet, registry.clone(), config.security.clone())
                .with_encoding(config.encoding_version)
                .with_metrics(metrics.clone()),
        );
        let coordinator = Arc::new(
            PauseCoordinator::new(
                config.chain.clone(),
                registry.clone(),
                config.security,
                signer,
            )
            .with_metrics(metrics.clone()),
        );
        Self::new(
            config.chain,
            registry,
            ingester,
            coordinator,
            config.block_poll_interval,
            metrics,
        )
    }

    /// Validates the persisted cache and spawns the block watcher and the
    /// anomaly handler. A cache that cannot be wiped aborts startup.
    pub async fn start(
        self,
        anomalies: mpsc::Receiver<Anomaly>,
        cancel: CancellationToken,
    ) -> GuardianResult<Vec<JoinHandle<()>>> {
        self.ingester.initialize().await?;
        for role in ContractRole::ALL {
            let handle = self.registry.handle(role).await?;
            info!(
                "[GuardianNode] {} contract at {:?}",
                role.as_str(),
                handle.address
            );
        }

        let mut handles = vec![];
        handles.push(tokio::spawn(run_block_watcher(
            self.chain,
            self.registry,
            self.ingester,
            self.poll_interval,
            self.metrics,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(run_anomaly_handler(
            self.coordinator,
            anomalies,
            cancel,
        )));
        info!("[GuardianNode] Started");
        Ok(handles)
    }
}

async fn run_block_watcher(
    chain: Arc<dyn ChainClient>,
    registry: Arc<ContractRegistry>,
    ingester: Arc<DepositEventIngester>,
    poll_interval: Duration,
    metrics: Option<Arc<GuardianMetrics>>,
    cancel: CancellationToken,
) {
    info!("[BlockWatcher] Starting with poll interval {:?}", poll_interval);
    let rate = ingester.config().update_block_rate.max(1);
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_block: Option<u64> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[BlockWatcher] Shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        let head = match chain.get_block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!("[BlockWatcher] Failed to get latest block: {}", e);
                continue;
            }
        };
        if last_block.is_some_and(|last| head <= last) {
            continue;
        }
        if let Some(metrics) = &metrics {
            metrics.last_observed_block.set(head as i64);
        }

        if let Err(e) = registry.refresh_volatile().await {
            warn!("[BlockWatcher] Failed to refresh contract addresses: {}", e);
        }

        // Only the last `rate` new blocks can hold a refresh trigger
        let first = match last_block {
            Some(last) => (last + 1).max(head.saturating_sub(rate - 1)),
            None => head,
        };
        last_block = Some(head);
        for block in (first..=head).filter(|block| block % rate == 0) {
            let ingester = ingester.clone();
            tokio::spawn(async move {
                if let Err(e) = ingester.handle_new_block(block).await {
                    error!(
                        "[BlockWatcher] Deposit cache refresh at block {} failed: {}",
                        block, e
                    );
                }
            });
        }
    }
}

async fn run_anomaly_handler(
    coordinator: Arc<PauseCoordinator>,
    mut anomalies: mpsc::Receiver<Anomaly>,
    cancel: CancellationToken,
) {
    loop {
        let anomaly = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[AnomalyHandler] Shutting down");
                break;
            }
            anomaly = anomalies.recv() => match anomaly {
                Some(anomaly) => anomaly,
                None => {
                    info!("[AnomalyHandler] Anomaly channel closed");
                    break;
                }
            },
        };
        warn!(
            "[AnomalyHandler] Anomaly reported for validator {} (slash amount {})",
            anomaly.validator_index, anomaly.slash_amount
        );
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            match coordinator.handle_anomaly(&anomaly).await {
                Ok(outcome) => info!(
                    "[AnomalyHandler] Pause for validator {} finished: {}",
                    anomaly.validator_index,
                    outcome.as_str()
                ),
                Err(e) => error!(
                    "[AnomalyHandler] Failed to pause deposits for validator {}: {}",
                    anomaly.validator_index, e
                ),
            }
        });
    }
}
