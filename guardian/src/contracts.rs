// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Registry of live contract addresses keyed by logical role.
//!
//! Permanent roles are resolved once and cached for the process lifetime.
//! Volatile roles are re-resolved by [`ContractRegistry::refresh_volatile`]
//! and replaced, with a new generation, when the locator points elsewhere.
//! Consumers that derive state from a handle compare generations to detect
//! a re-initialized binding.

use crate::error::GuardianResult;
use crate::eth_contracts::ContractLocator;
use crate::metrics::GuardianMetrics;
use ethers::types::Address as EthAddress;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractRole {
    Deposit,
    Security,
}

impl ContractRole {
    pub const ALL: [ContractRole; 2] = [ContractRole::Deposit, ContractRole::Security];

    pub fn is_permanent(&self) -> bool {
        matches!(self, ContractRole::Deposit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractRole::Deposit => "deposit",
            ContractRole::Security => "security",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractHandle {
    pub role: ContractRole,
    pub address: EthAddress,
    pub generation: u64,
}

pub struct ContractRegistry {
    locator: Arc<dyn ContractLocator>,
    handles: RwLock<HashMap<ContractRole, ContractHandle>>,
    next_generation: AtomicU64,
    metrics: Option<Arc<GuardianMetrics>>,
}

impl ContractRegistry {
    pub fn new(locator: Arc<dyn ContractLocator>) -> Self {
        Self {
            locator,
            handles: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GuardianMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current handle for `role`, resolved lazily on first use.
    pub async fn handle(&self, role: ContractRole) -> GuardianResult<ContractHandle> {
        if let Some(handle) = self.handles.read().await.get(&role) {
            return Ok(*handle);
        }
        let address = self.locator.resolve(role).await?;
        let mut handles = self.handles.write().await;
        // Another caller may have resolved it while we were waiting
        if let Some(handle) = handles.get(&role) {
            return Ok(*handle);
        }
        let handle = self.new_handle(role, address);
        info!(
            "[ContractRegistry] Resolved {} contract at {:?}",
            role.as_str(),
            address
        );
        handles.insert(role, handle);
        Ok(handle)
    }

    pub async fn address(&self, role: ContractRole) -> GuardianResult<EthAddress> {
        Ok(self.handle(role).await?.address)
    }

    /// Re-resolve every volatile role. Returns the roles whose address changed.
    pub async fn refresh_volatile(&self) -> GuardianResult<Vec<ContractRole>> {
        let mut changed = vec![];
        for role in ContractRole::ALL.iter().filter(|r| !r.is_permanent()) {
            let address = self.locator.resolve(*role).await?;
            if self.replace_if_changed(*role, address).await {
                changed.push(*role);
            }
        }
        Ok(changed)
    }

    /// Force re-resolution of `role`, permanent or not.
    pub async fn reinit(&self, role: ContractRole) -> GuardianResult<ContractHandle> {
        let address = self.locator.resolve(role).await?;
        self.replace_if_changed(role, address).await;
        self.handle(role).await
    }

    async fn replace_if_changed(&self, role: ContractRole, address: EthAddress) -> bool {
        let mut handles = self.handles.write().await;
        match handles.get(&role) {
            Some(current) if current.address == address => false,
            Some(current) => {
                warn!(
                    "[ContractRegistry] {} contract address changed from {:?} to {:?}",
                    role.as_str(),
                    current.address,
                    address
                );
                if let Some(metrics) = &self.metrics {
                    metrics
                        .contract_address_changes
                        .with_label_values(&[role.as_str()])
                        .inc();
                }
                let handle = self.new_handle(role, address);
                handles.insert(role, handle);
                true
            }
            None => {
                info!(
                    "[ContractRegistry] Resolved {} contract at {:?}",
                    role.as_str(),
                    address
                );
                let handle = self.new_handle(role, address);
                handles.insert(role, handle);
                false
            }
        }
    }

    fn new_handle(&self, role: ContractRole, address: EthAddress) -> ContractHandle {
        ContractHandle {
            role,
            address,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
        }
    }
}
