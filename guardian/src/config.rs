// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::cache_store::{CacheStore, RocksDbCacheStore};
use crate::chain_client::ChainClient;
use crate::deposits::IngesterConfig;
use crate::eth_client::EthClient;
use crate::eth_contracts::{ContractLocator, EthContractLocator, EthSecurityContract, SecurityContract};
use crate::metered_eth_provider::{MeteredEthHttpProvider, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::metrics::GuardianMetrics;
use crate::retry_with_max_elapsed_time;
use crate::signing::encoding::EncodingVersion;
use anyhow::anyhow;
use ethers::middleware::SignerMiddleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address as EthAddress;
use guardian_config::Config;
use guardian_keys::keypair_file::{read_key, read_key_from_env};
use guardian_keys::GUARDIAN_PRIVATE_KEY_ENV;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound on retrying the initial provider connection
const STARTUP_CONNECT_TIMEOUT_SECS: u64 = 60;

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuardianNodeConfig {
    // Rpc url of the Ethereum execution node
    pub eth_rpc_url: String,
    // Chain id the node must be connected to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    // Address of the protocol locator contract
    pub locator_address: String,
    // Hex encoded guardian key. Falls back to GUARDIAN_PRIVATE_KEY when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_key_path: Option<PathBuf>,
    // Directory of the persisted deposit cache
    pub cache_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_block_poll_interval")]
    pub block_poll_interval: Duration,
    // Upper bound on a single rpc request
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_eth_request_timeout")]
    pub eth_request_timeout: Duration,
    #[serde(default)]
    pub encoding_version: EncodingVersion,
    #[serde(default)]
    pub deposits: IngesterConfig,
}

fn default_block_poll_interval() -> Duration {
    Duration::from_secs(6)
}

fn default_eth_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

impl Config for GuardianNodeConfig {}

/// Connected runtime components produced from a validated config.
pub struct GuardianServerConfig {
    pub wallet: LocalWallet,
    pub chain: Arc<dyn ChainClient>,
    pub locator: Arc<dyn ContractLocator>,
    pub security: Arc<dyn SecurityContract>,
    pub cache_store: Arc<dyn CacheStore>,
    pub ingester_config: IngesterConfig,
    pub deployment_block: u64,
    pub encoding_version: EncodingVersion,
    pub block_poll_interval: Duration,
}

impl GuardianNodeConfig {
    pub async fn validate(
        &self,
        metrics: Arc<GuardianMetrics>,
    ) -> anyhow::Result<GuardianServerConfig> {
        info!("Starting config validation");
        self.deposits.validate()?;
        let locator_address = EthAddress::from_str(&self.locator_address)
            .map_err(|e| anyhow!("Invalid locator-address {}: {}", self.locator_address, e))?;

        let wallet = self.load_guardian_key()?;
        info!("Loaded guardian key for {:?}", wallet.address());

        let eth_client: EthClient<MeteredEthHttpProvider> = retry_with_max_elapsed_time!(
            EthClient::new(
                &self.eth_rpc_url,
                metrics.clone(),
                self.expected_chain_id,
                self.eth_request_timeout
            ),
            Duration::from_secs(STARTUP_CONNECT_TIMEOUT_SECS)
        )
        .map_err(|e| anyhow!("Failed to connect to {}: {}", self.eth_rpc_url, e))??;
        let chain_id = eth_client.get_chain_id().await?;
        let deployment_block = self.deposits.resolve_deployment_block(chain_id)?;
        info!(
            "Deposit contract deployment block for chain {}: {}",
            chain_id, deployment_block
        );

        let provider = Arc::new(eth_client.provider());
        let signer_client = Arc::new(SignerMiddleware::new(
            eth_client.provider(),
            wallet.clone().with_chain_id(chain_id),
        ));

        let cache_store = RocksDbCacheStore::open(&self.cache_dir)?;

        info!("Config validation complete");
        Ok(GuardianServerConfig {
            wallet,
            chain: Arc::new(eth_client),
            locator: Arc::new(EthContractLocator::new(locator_address, provider)),
            security: Arc::new(EthSecurityContract::new(signer_client)),
            cache_store: Arc::new(cache_store),
            ingester_config: self.deposits.clone(),
            deployment_block,
            encoding_version: self.encoding_version,
            block_poll_interval: self.block_poll_interval,
        })
    }

    fn load_guardian_key(&self) -> anyhow::Result<LocalWallet> {
        match &self.guardian_key_path {
            Some(path) => read_key(path).map_err(|e| {
                anyhow!(
                    "Failed to read guardian key from {:?}: {}. \
                    You can generate a new key using: guardian-keygen generate --output <path>",
                    path,
                    e
                )
            }),
            None => read_key_from_env(GUARDIAN_PRIVATE_KEY_ENV),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
eth-rpc-url: http://localhost:8545
locator-address: "0xC1d0b3DE6792Bf6b4b37EccdcC24e45978Cfd2Eb"
cache-dir: /var/lib/guardian
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GuardianNodeConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.block_poll_interval, Duration::from_secs(6));
        assert_eq!(config.eth_request_timeout, Duration::from_secs(30));
        assert_eq!(config.encoding_version, EncodingVersion::Canonical);
        assert_eq!(config.deposits, IngesterConfig::default());
        assert!(config.expected_chain_id.is_none());
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = format!(
            "{}expected-chain-id: 17000\nmetrics-port: 9184\nblock-poll-interval: 1500\neth-request-timeout: 2000\nencoding-version: packed\ndeposits:\n  step: 2000\n  lag: 64\n",
            MINIMAL
        );
        let config: GuardianNodeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.expected_chain_id, Some(17000));
        assert_eq!(config.metrics_port, Some(9184));
        assert_eq!(config.block_poll_interval, Duration::from_millis(1500));
        assert_eq!(config.eth_request_timeout, Duration::from_secs(2));
        assert_eq!(config.encoding_version, EncodingVersion::Packed);
        assert_eq!(config.deposits.step, 2000);
        assert_eq!(config.deposits.lag, 64);
        assert_eq!(config.deposits.update_block_rate, 10);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guardian.yaml");
        let config: GuardianNodeConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.save(&path).unwrap();
        let loaded = GuardianNodeConfig::load(&path).unwrap();
        assert_eq!(loaded.locator_address, config.locator_address);
        assert_eq!(loaded.cache_dir, config.cache_dir);
    }

    #[test]
    fn test_load_guardian_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("guardian.key");
        let address =
            guardian_keys::keygen::generate_guardian_key_and_write_to_file(&key_path).unwrap();
        let mut config: GuardianNodeConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.guardian_key_path = Some(key_path);
        assert_eq!(config.load_guardian_key().unwrap().address(), address);

        config.guardian_key_path = Some(dir.path().join("missing.key"));
        let err = config.load_guardian_key().unwrap_err();
        assert!(err.to_string().contains("guardian-keygen"));
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_locator_address() {
        let mut config: GuardianNodeConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.locator_address = "not-an-address".to_string();
        let metrics = Arc::new(GuardianMetrics::new_for_testing());
        let err = config.validate(metrics).await.err().unwrap();
        assert!(err.to_string().contains("Invalid locator-address"));
    }
}
