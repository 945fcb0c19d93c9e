// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::DepositEventFilter;
use crate::cache_store::CacheStore;
use crate::chain_client::ChainClient;
use crate::contracts::{ContractRegistry, ContractRole};
use crate::deposits::config::IngesterConfig;
use crate::error::{GuardianError, GuardianResult};
use crate::metrics::GuardianMetrics;
use crate::single_flight::SingleFlightGuard;
use crate::types::{DepositEvent, DepositEventCache};
use ethers::contract::EthEvent;
use ethers::types::Address as EthAddress;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{debug, error, info, warn};

pub const DEPOSIT_CACHE_KEY: &str = "deposit-events";

/// Version stamped into every persisted cache. A cache written by any other
/// build is discarded.
pub const DEPOSIT_CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Enough of the persisted layout to read the version of any past schema.
#[derive(Deserialize)]
struct CacheHeader {
    version: String,
}

/// Reorg-lagged local replica of deposit contract events.
pub struct DepositEventIngester {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn CacheStore>,
    registry: Arc<ContractRegistry>,
    config: IngesterConfig,
    deployment_block: u64,
    version: String,
    refresh_guard: SingleFlightGuard,
    metrics: Option<Arc<GuardianMetrics>>,
}

impl DepositEventIngester {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn CacheStore>,
        registry: Arc<ContractRegistry>,
        config: IngesterConfig,
        deployment_block: u64,
    ) -> Self {
        Self {
            chain,
            store,
            registry,
            config,
            deployment_block,
            version: DEPOSIT_CACHE_VERSION.to_string(),
            refresh_guard: SingleFlightGuard::new("deposit_cache_refresh"),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GuardianMetrics>>) -> Self {
        self.refresh_guard = self.refresh_guard.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn config(&self) -> &IngesterConfig {
        &self.config
    }

    /// Startup check of the persisted cache. A cache from another build, or
    /// one that cannot be decoded, is deleted. Failing to delete it is fatal.
    pub async fn initialize(&self) -> GuardianResult<()> {
        let Some(blob) = self.store.get_blob(DEPOSIT_CACHE_KEY).await? else {
            info!("[DepositIngester] No persisted deposit cache, starting empty");
            return Ok(());
        };
        match self.decode(&blob) {
            Ok(cache) => {
                info!(
                    "[DepositIngester] Loaded deposit cache [{}, {}] with {} events",
                    cache.start_block,
                    cache.end_block,
                    cache.events.len()
                );
                self.observe(&cache);
                Ok(())
            }
            Err(e) => {
                warn!("[DepositIngester] Discarding persisted deposit cache: {}", e);
                self.wipe().await
            }
        }
    }

    /// Persisted cache with its bounds clamped to the deployment block.
    pub async fn get_cached_events(&self) -> GuardianResult<DepositEventCache> {
        let mut cache = self.load_cache().await?;
        cache.start_block = cache.start_block.max(self.deployment_block);
        cache.end_block = cache.end_block.max(self.deployment_block);
        Ok(cache)
    }

    /// Extend the persisted cache up to `head - lag`, one chunk at a time.
    pub async fn refresh(&self) -> GuardianResult<()> {
        let head = self.chain.get_block_number().await?;
        let to_block = head.saturating_sub(self.config.lag);
        let mut cache = self.get_cached_events().await?;
        let from_block = cache.end_block + 1;
        if from_block > to_block {
            debug!(
                "[DepositIngester] Cache is up to date at {} (head {}, lag {})",
                cache.end_block, head, self.config.lag
            );
            return Ok(());
        }

        let address = self.registry.address(ContractRole::Deposit).await?;
        let step = self.config.step.max(1);
        let mut chunk_start = from_block;
        while chunk_start <= to_block {
            let chunk_end = to_block.min(chunk_start.saturating_add(step - 1));
            let events = self.fetch_range_at(address, chunk_start, chunk_end).await?;
            let fetched = events.len();
            cache.events.extend(events);
            cache.end_block = chunk_end;
            self.persist(&cache).await?;
            info!(
                "[DepositIngester] Cached deposit events [{}, {}]: {} new, {} total",
                chunk_start,
                chunk_end,
                fetched,
                cache.events.len()
            );
            chunk_start = chunk_end + 1;
        }
        Ok(())
    }

    pub async fn fetch_range(&self, start: u64, end: u64) -> GuardianResult<Vec<DepositEvent>> {
        let address = self.registry.address(ContractRole::Deposit).await?;
        self.fetch_range_at(address, start, end).await
    }

    /// Cached events merged with a fetch of the uncached tail up to
    /// `upto_block`. Nothing is persisted.
    pub async fn get_all_events(&self, upto_block: u64) -> GuardianResult<DepositEventCache> {
        let mut cache = self.get_cached_events().await?;
        if upto_block <= cache.end_block {
            cache.events.retain(|event| event.block_number <= upto_block);
            cache.start_block = cache.start_block.min(upto_block);
            cache.end_block = upto_block;
            return Ok(cache);
        }
        let fresh = self.fetch_range(cache.end_block + 1, upto_block).await?;
        debug!(
            "[DepositIngester] Fetched {} uncached deposit events [{}, {}]",
            fresh.len(),
            cache.end_block + 1,
            upto_block
        );
        cache.events.extend(fresh);
        cache.end_block = upto_block;
        Ok(cache)
    }

    /// Block notification entry point. Refreshes on every
    /// `update_block_rate`-th block; triggers arriving while a refresh is
    /// running are dropped.
    pub async fn handle_new_block(&self, block_number: u64) -> GuardianResult<()> {
        if block_number % self.config.update_block_rate.max(1) != 0 {
            return Ok(());
        }
        match self.refresh_guard.run(|| self.refresh()).await {
            Some(result) => result,
            None => {
                debug!(
                    "[DepositIngester] Refresh already running, skipping block {}",
                    block_number
                );
                Ok(())
            }
        }
    }

    // Rate-limited ranges are split in two and fetched concurrently; the
    // halves are joined positionally so block order is preserved. Any other
    // provider error is retried on the same range without bound.
    fn fetch_range_at(
        &self,
        address: EthAddress,
        start: u64,
        end: u64,
    ) -> BoxFuture<'_, GuardianResult<Vec<DepositEvent>>> {
        async move {
            if start > end {
                return Err(GuardianError::InvalidBlockRange { start, end });
            }
            loop {
                let result = self
                    .chain
                    .query_logs(address, DepositEventFilter::signature(), start, end)
                    .await;
                let err = match result {
                    Ok(logs) => {
                        return logs.into_iter().map(DepositEvent::try_from_log).collect();
                    }
                    Err(err) => err,
                };
                match err {
                    GuardianError::TransientProviderError(ref reason) if end > start => {
                        let mid = start + (end - start + 1) / 2;
                        debug!(
                            "[DepositIngester] Range [{}, {}] limited ({}), splitting at {}",
                            start, end, reason, mid
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.deposit_range_splits.inc();
                        }
                        let (mut first, second) = futures::future::try_join(
                            self.fetch_range_at(address, start, mid - 1),
                            self.fetch_range_at(address, mid, end),
                        )
                        .await?;
                        first.extend(second);
                        return Ok(first);
                    }
                    err if err.is_retryable() => {
                        warn!(
                            "[DepositIngester] Failed to fetch deposit events [{}, {}], retrying in {:?}: {}",
                            start, end, self.config.retry_delay, err
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics
                                .deposit_fetch_retries
                                .with_label_values(&[err.error_type()])
                                .inc();
                        }
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                    err => return Err(err),
                }
            }
        }
        .boxed()
    }

    fn empty_cache(&self) -> DepositEventCache {
        DepositEventCache::empty(self.deployment_block, self.version.clone())
    }

    async fn load_cache(&self) -> GuardianResult<DepositEventCache> {
        let Some(blob) = self.store.get_blob(DEPOSIT_CACHE_KEY).await? else {
            return Ok(self.empty_cache());
        };
        match self.decode(&blob) {
            Ok(cache) => Ok(cache),
            Err(mismatch @ GuardianError::CacheVersionMismatch { .. }) => {
                warn!("[DepositIngester] {}, wiping cache", mismatch);
                self.wipe().await?;
                Ok(self.empty_cache())
            }
            Err(e) => Err(e),
        }
    }

    fn decode(&self, blob: &[u8]) -> GuardianResult<DepositEventCache> {
        let header: CacheHeader = serde_json::from_slice(blob)
            .map_err(|e| GuardianError::CacheSerializationError(e.to_string()))?;
        if header.version != self.version {
            return Err(GuardianError::CacheVersionMismatch {
                found: header.version,
                expected: self.version.clone(),
            });
        }
        serde_json::from_slice(blob)
            .map_err(|e| GuardianError::CacheSerializationError(e.to_string()))
    }

    async fn persist(&self, cache: &DepositEventCache) -> GuardianResult<()> {
        let blob = serde_json::to_vec(cache)
            .map_err(|e| GuardianError::CacheSerializationError(e.to_string()))?;
        self.store.set_blob(DEPOSIT_CACHE_KEY, blob).await?;
        self.observe(cache);
        Ok(())
    }

    async fn wipe(&self) -> GuardianResult<()> {
        self.store
            .delete_blob(DEPOSIT_CACHE_KEY)
            .await
            .map_err(|e| GuardianError::CacheWipeFailed(e.to_string()))
            .tap_err(|e| error!("[DepositIngester] {}", e))?;
        info!("[DepositIngester] Deposit cache wiped");
        Ok(())
    }

    fn observe(&self, cache: &DepositEventCache) {
        if let Some(metrics) = &self.metrics {
            metrics.deposit_cache_end_block.set(cache.end_block as i64);
            metrics.deposit_cache_events.set(cache.events.len() as i64);
        }
    }
}
