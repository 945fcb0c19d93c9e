// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract-call seams used by the signing and pause paths.
//!
//! The traits take the target address on every call so that a single
//! implementation keeps working when the registry re-resolves a role.

use crate::abi::{DepositSecurityModule, ProtocolLocator};
use crate::contracts::ContractRole;
use crate::error::{GuardianError, GuardianResult};
use crate::types::{AttestationKind, BlockTag, GuardianSignature, PauseAttestation};
use async_trait::async_trait;
use ethers::providers::{Middleware, PendingTransaction};
use ethers::types::{Address as EthAddress, BlockId, TransactionReceipt, TxHash, U256};
use std::sync::Arc;
use tap::TapFallible;

#[async_trait]
pub trait SecurityContract: Send + Sync {
    /// Domain-separation prefix for attestations of `kind`.
    async fn message_prefix(
        &self,
        at: EthAddress,
        kind: AttestationKind,
    ) -> GuardianResult<[u8; 32]>;

    /// Ordered guardian set as of `block`.
    async fn guardians(&self, at: EthAddress, block: BlockTag) -> GuardianResult<Vec<EthAddress>>;

    async fn is_deposits_paused(&self, at: EthAddress) -> GuardianResult<bool>;

    async fn submit_pause(
        &self,
        at: EthAddress,
        attestation: &PauseAttestation,
        signature: &GuardianSignature,
    ) -> GuardianResult<TxHash>;

    /// `None` when the transaction was dropped before confirming.
    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        confirmations: usize,
    ) -> GuardianResult<Option<TransactionReceipt>>;
}

#[async_trait]
pub trait ContractLocator: Send + Sync {
    async fn resolve(&self, role: ContractRole) -> GuardianResult<EthAddress>;
}

/// `M` is expected to be signer-bound for `submit_pause`.
pub struct EthSecurityContract<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthSecurityContract<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    fn contract(&self, at: EthAddress) -> DepositSecurityModule<M> {
        DepositSecurityModule::new(at, self.client.clone())
    }
}

#[async_trait]
impl<M: Middleware + 'static> SecurityContract for EthSecurityContract<M> {
    async fn message_prefix(
        &self,
        at: EthAddress,
        kind: AttestationKind,
    ) -> GuardianResult<[u8; 32]> {
        let contract = self.contract(at);
        let result = match kind {
            AttestationKind::Deposit => contract.get_attest_message_prefix().call().await,
            AttestationKind::Pause => contract.get_pause_message_prefix().call().await,
        };
        result.map_err(|e| {
            GuardianError::SignatureProtocolError(format!(
                "failed to fetch {} message prefix from {:?}: {}",
                kind.as_str(),
                at,
                e
            ))
        })
    }

    async fn guardians(&self, at: EthAddress, block: BlockTag) -> GuardianResult<Vec<EthAddress>> {
        self.contract(at)
            .get_guardians()
            .block(BlockId::from(block))
            .call()
            .await
            .map_err(|e| GuardianError::ProviderError(format!("getGuardians failed: {}", e)))
    }

    async fn is_deposits_paused(&self, at: EthAddress) -> GuardianResult<bool> {
        self.contract(at)
            .is_deposits_paused()
            .call()
            .await
            .map_err(|e| GuardianError::ProviderError(format!("isDepositsPaused failed: {}", e)))
    }

    async fn submit_pause(
        &self,
        at: EthAddress,
        attestation: &PauseAttestation,
        signature: &GuardianSignature,
    ) -> GuardianResult<TxHash> {
        let (r, vs) = signature.to_compact();
        let call = self.contract(at).pause_deposits(
            U256::from(attestation.block_number),
            U256::from(attestation.validator_index),
            attestation.slash_amount,
            r.0,
            vs.0,
        );
        let pending = call
            .send()
            .await
            .map_err(|e| GuardianError::TransactionSubmissionError(e.to_string()))
            .tap_err(|e| tracing::error!("[SecurityContract] pauseDeposits send failed: {:?}", e))?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        confirmations: usize,
    ) -> GuardianResult<Option<TransactionReceipt>> {
        PendingTransaction::new(tx_hash, self.client.provider())
            .confirmations(confirmations)
            .await
            .map_err(|e| GuardianError::TransactionSubmissionError(e.to_string()))
    }
}

pub struct EthContractLocator<M> {
    locator: ProtocolLocator<M>,
}

impl<M: Middleware + 'static> EthContractLocator<M> {
    pub fn new(address: EthAddress, client: Arc<M>) -> Self {
        Self {
            locator: ProtocolLocator::new(address, client),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ContractLocator for EthContractLocator<M> {
    async fn resolve(&self, role: ContractRole) -> GuardianResult<EthAddress> {
        let result = match role {
            ContractRole::Deposit => self.locator.deposit_contract().call().await,
            ContractRole::Security => self.locator.deposit_security_module().call().await,
        };
        let address = result.map_err(|e| {
            GuardianError::ContractResolutionError(format!(
                "failed to resolve {} contract: {}",
                role.as_str(),
                e
            ))
        })?;
        if address.is_zero() {
            return Err(GuardianError::ContractResolutionError(format!(
                "locator returned zero address for {} contract",
                role.as_str()
            )));
        }
        Ok(address)
    }
}
