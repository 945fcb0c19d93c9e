// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::GuardianResult;
use crate::types::{BlockRef, BlockTag};
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, Log, H256};

/// Read-only view of the chain used by the ingester and the pause path.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_block_number(&self) -> GuardianResult<u64>;

    async fn get_block(&self, tag: BlockTag) -> GuardianResult<BlockRef>;

    async fn get_chain_id(&self) -> GuardianResult<u64>;

    /// Logs emitted by `address` with `topic0 == event_signature` in
    /// `[from_block, to_block]`, in chain order. Rate limits and timeouts
    /// surface as `TransientProviderError`.
    async fn query_logs(
        &self,
        address: EthAddress,
        event_signature: H256,
        from_block: u64,
        to_block: u64,
    ) -> GuardianResult<Vec<Log>>;
}
