// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::ChainClient;
use crate::error::{GuardianError, GuardianResult};
use crate::metered_eth_provider::{
    is_rate_limit_error, is_timeout_error, new_metered_eth_provider, MeteredEthHttpProvider,
};
use crate::metrics::GuardianMetrics;
use crate::types::{BlockRef, BlockTag};
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::{Address as EthAddress, BlockId, Filter, Log, H256};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

pub struct EthClient<P> {
    provider: Provider<P>,
    /// Expected chain ID for validation
    expected_chain_id: Option<u64>,
}

impl EthClient<MeteredEthHttpProvider> {
    pub async fn new(
        provider_url: &str,
        metrics: Arc<GuardianMetrics>,
        expected_chain_id: Option<u64>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let provider = new_metered_eth_provider(provider_url, metrics, request_timeout)?;
        let self_ = Self {
            provider,
            expected_chain_id,
        };
        self_.describe().await?;
        Ok(self_)
    }
}

impl<P> EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn from_provider(provider: Provider<P>, expected_chain_id: Option<u64>) -> Self {
        Self {
            provider,
            expected_chain_id,
        }
    }

    pub fn provider(&self) -> Provider<P>
    where
        P: Clone,
    {
        self.provider.clone()
    }

    // Validate chain identifier and log connection info
    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.provider.get_chainid().await?.as_u64();
        let block_number = self.provider.get_block_number().await?;

        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch: expected {}, got {}. This could indicate connecting to the wrong network!",
                    expected,
                    chain_id
                ));
            }
            tracing::info!(
                "EthClient connected to chain {} (verified), current block: {}",
                chain_id,
                block_number
            );
        } else {
            tracing::warn!(
                "EthClient connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}",
                chain_id,
                block_number
            );
        }
        Ok(())
    }
}

/// Rate limits and timeouts become `TransientProviderError`, everything else
/// `ProviderError`.
pub fn classify_provider_error(error: &ProviderError) -> GuardianError {
    let message = format!("{} {:?}", error, error);
    if is_rate_limit_error(&message) || is_timeout_error(&message) {
        GuardianError::TransientProviderError(error.to_string())
    } else {
        GuardianError::ProviderError(error.to_string())
    }
}

#[async_trait]
impl<P> ChainClient for EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn get_block_number(&self) -> GuardianResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| classify_provider_error(&e))?;
        Ok(number.as_u64())
    }

    async fn get_block(&self, tag: BlockTag) -> GuardianResult<BlockRef> {
        let block = self
            .provider
            .get_block(BlockId::from(tag))
            .await
            .map_err(|e| classify_provider_error(&e))?
            .ok_or_else(|| GuardianError::ProviderError(format!("block {:?} not found", tag)))?;
        // Pending blocks carry neither number nor hash
        match (block.number, block.hash) {
            (Some(number), Some(hash)) => Ok(BlockRef {
                number: number.as_u64(),
                hash,
            }),
            _ => Err(GuardianError::ProviderError(format!(
                "block {:?} is missing number or hash",
                tag
            ))),
        }
    }

    async fn get_chain_id(&self) -> GuardianResult<u64> {
        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| classify_provider_error(&e))?;
        Ok(chain_id.as_u64())
    }

    async fn query_logs(
        &self,
        address: EthAddress,
        event_signature: H256,
        from_block: u64,
        to_block: u64,
    ) -> GuardianResult<Vec<Log>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(address)
            .topic0(event_signature);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| classify_provider_error(&e))
            .tap_err(|e| {
                tracing::debug!(
                    "get_logs failed for [{}, {}]. Filter: {:?}. Error: {:?}",
                    from_block,
                    to_block,
                    filter,
                    e
                )
            })?;

        // Safeguard check that all events are emitted from the requested contract address
        if let Some(log) = logs.iter().find(|log| log.address != address) {
            return Err(GuardianError::ProviderError(format!(
                "Provider returns logs from different contract address (expected: {:?}): {:?}",
                address, log
            )));
        }
        Ok(logs)
    }
}
