// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::ChainClient;
use crate::contracts::{ContractRegistry, ContractRole};
use crate::error::{GuardianError, GuardianResult};
use crate::eth_contracts::SecurityContract;
use crate::metrics::GuardianMetrics;
use crate::signing::AttestationSigner;
use crate::single_flight::SingleFlightGuard;
use crate::types::{Anomaly, AttestationMessage, BlockTag, GuardianIndex, PauseAttestation};
use ethers::types::TxHash;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{error, info, warn};

const PAUSE_CONFIRMATIONS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseOutcome {
    /// Deposits were already paused, nothing was sent
    AlreadyPaused,
    /// This node is not a guardian, nothing was sent
    NotGuardian,
    Submitted {
        tx_hash: TxHash,
        confirmed_block: Option<u64>,
    },
    /// Another pause attempt was running, this one was dropped
    InFlight,
}

impl PauseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseOutcome::AlreadyPaused => "already_paused",
            PauseOutcome::NotGuardian => "not_guardian",
            PauseOutcome::Submitted { .. } => "submitted",
            PauseOutcome::InFlight => "in_flight",
        }
    }
}

/// Submits the deposit pause transaction for a detected anomaly.
///
/// Submission errors are returned to the caller and never retried here.
pub struct PauseCoordinator {
    chain: Arc<dyn ChainClient>,
    registry: Arc<ContractRegistry>,
    security: Arc<dyn SecurityContract>,
    signer: Arc<AttestationSigner>,
    guard: SingleFlightGuard,
    metrics: Option<Arc<GuardianMetrics>>,
}

impl PauseCoordinator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<ContractRegistry>,
        security: Arc<dyn SecurityContract>,
        signer: Arc<AttestationSigner>,
    ) -> Self {
        Self {
            chain,
            registry,
            security,
            signer,
            guard: SingleFlightGuard::new("pause_deposits"),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GuardianMetrics>>) -> Self {
        self.guard = self.guard.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub async fn handle_anomaly(&self, anomaly: &Anomaly) -> GuardianResult<PauseOutcome> {
        let result = match self.guard.run(|| self.pause(anomaly)).await {
            Some(result) => result,
            None => {
                info!(
                    "[PauseCoordinator] Pause already in flight, dropping anomaly for validator {}",
                    anomaly.validator_index
                );
                Ok(PauseOutcome::InFlight)
            }
        };
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(outcome) => metrics
                    .pause_outcomes
                    .with_label_values(&[outcome.as_str()])
                    .inc(),
                Err(_) => metrics.err_pause_submission.inc(),
            }
        }
        result
    }

    async fn pause(&self, anomaly: &Anomaly) -> GuardianResult<PauseOutcome> {
        let security = self.registry.address(ContractRole::Security).await?;

        // Read fresh on every attempt
        if self.security.is_deposits_paused(security).await? {
            info!("[PauseCoordinator] Deposits are already paused, skipping");
            return Ok(PauseOutcome::AlreadyPaused);
        }

        let block = self.chain.get_block(BlockTag::Latest).await?;
        let index = self
            .signer
            .guardian_index(BlockTag::Number(block.number))
            .await?;
        if let GuardianIndex::NotMember = index {
            warn!(
                "[PauseCoordinator] {:?} is not a guardian, cannot pause deposits",
                self.signer.address()
            );
            return Ok(PauseOutcome::NotGuardian);
        }

        let attestation = PauseAttestation {
            block_number: block.number,
            validator_index: anomaly.validator_index,
            slash_amount: anomaly.slash_amount,
        };
        let signature = self
            .signer
            .sign(&AttestationMessage::Pause(attestation.clone()))
            .await?;
        info!(
            "[PauseCoordinator] Pausing deposits at block {} ({:?}) as guardian {} for validator {}",
            block.number,
            block.hash,
            index.as_i64(),
            anomaly.validator_index
        );

        let tx_hash = self
            .security
            .submit_pause(security, &attestation, &signature)
            .await
            .tap_err(|e| error!("[PauseCoordinator] Pause submission failed: {}", e))?;
        info!("[PauseCoordinator] Pause transaction sent: {:?}", tx_hash);

        let receipt = self
            .security
            .wait_for_confirmation(tx_hash, PAUSE_CONFIRMATIONS)
            .await
            .tap_err(|e| error!("[PauseCoordinator] Waiting for {:?} failed: {}", tx_hash, e))?;
        let Some(receipt) = receipt else {
            error!("[PauseCoordinator] Pause transaction {:?} was dropped", tx_hash);
            return Err(GuardianError::TransactionSubmissionError(format!(
                "transaction {:?} dropped before confirmation",
                tx_hash
            )));
        };
        if receipt.status.map(|s| s.as_u64()) == Some(0) {
            error!("[PauseCoordinator] Pause transaction {:?} reverted", tx_hash);
            return Err(GuardianError::TransactionSubmissionError(format!(
                "transaction {:?} reverted",
                tx_hash
            )));
        }
        let confirmed_block = receipt.block_number.map(|b| b.as_u64());
        info!(
            "[PauseCoordinator] Pause transaction {:?} confirmed in block {:?}",
            tx_hash, confirmed_block
        );
        Ok(PauseOutcome::Submitted {
            tx_hash,
            confirmed_block,
        })
    }
}
