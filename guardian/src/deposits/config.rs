// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

pub const MAINNET_CHAIN_ID: u64 = 1;
pub const GOERLI_CHAIN_ID: u64 = 5;
pub const HOLESKY_CHAIN_ID: u64 = 17000;
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// Block the deposit contract was deployed at, for known networks.
pub fn deposit_contract_deployment_block(chain_id: u64) -> Option<u64> {
    match chain_id {
        MAINNET_CHAIN_ID => Some(11_052_984),
        GOERLI_CHAIN_ID => Some(4_367_322),
        HOLESKY_CHAIN_ID => Some(0),
        SEPOLIA_CHAIN_ID => Some(1_273_020),
        _ => None,
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IngesterConfig {
    /// Blocks per fetch-and-persist chunk
    #[serde(default = "default_step")]
    pub step: u64,
    /// Distance kept behind the chain head
    #[serde(default = "default_lag")]
    pub lag: u64,
    /// Refresh only on block numbers divisible by this
    #[serde(default = "default_update_block_rate")]
    pub update_block_rate: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
    /// Overrides the per-network deployment block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_block: Option<u64>,
}

fn default_step() -> u64 {
    10_000
}

fn default_lag() -> u64 {
    128
}

fn default_update_block_rate() -> u64 {
    10
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            lag: default_lag(),
            update_block_rate: default_update_block_rate(),
            retry_delay: default_retry_delay(),
            deployment_block: None,
        }
    }
}

impl IngesterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.step == 0 {
            return Err(anyhow::anyhow!("deposits.step must be greater than zero"));
        }
        if self.update_block_rate == 0 {
            return Err(anyhow::anyhow!(
                "deposits.update-block-rate must be greater than zero"
            ));
        }
        Ok(())
    }

    pub fn resolve_deployment_block(&self, chain_id: u64) -> anyhow::Result<u64> {
        self.deployment_block
            .or_else(|| deposit_contract_deployment_block(chain_id))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No known deposit contract deployment block for chain {}, set deposits.deployment-block",
                    chain_id
                )
            })
    }
}
