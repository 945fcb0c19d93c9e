// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::DepositEventFilter;
use crate::chain_client::ChainClient;
use crate::contracts::ContractRole;
use crate::error::{GuardianError, GuardianResult};
use crate::eth_client::classify_provider_error;
use crate::eth_contracts::{ContractLocator, SecurityContract};
use crate::types::{AttestationKind, BlockRef, BlockTag, GuardianSignature, PauseAttestation};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::providers::ProviderError;
use ethers::signers::LocalWallet;
use ethers::types::{
    Address as EthAddress, Bytes, Log, TransactionReceipt, TxHash, H256, U256, U64,
};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const DEPOSIT_CONTRACT: EthAddress = EthAddress::repeat_byte(0xd0);
pub const SECURITY_CONTRACT: EthAddress = EthAddress::repeat_byte(0x5e);

// First anvil development account
pub const TEST_GUARDIAN_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_wallet() -> LocalWallet {
    guardian_keys::decode_private_key(TEST_GUARDIAN_KEY).unwrap()
}

/// A raw deposit event log as emitted by the deposit contract.
pub fn deposit_log(block_number: u64, log_index: u64, pubkey_byte: u8) -> Log {
    let data = ethers::abi::encode(&[
        Token::Bytes(vec![pubkey_byte; 48]),
        Token::Bytes(vec![0x01; 32]),
        Token::Bytes(32_000_000_000u64.to_le_bytes().to_vec()),
        Token::Bytes(vec![0x02; 96]),
        Token::Bytes(block_number.to_le_bytes().to_vec()),
    ]);
    let mut tx_hash = [0u8; 32];
    tx_hash[..8].copy_from_slice(&block_number.to_be_bytes());
    tx_hash[8..16].copy_from_slice(&log_index.to_be_bytes());
    Log {
        address: DEPOSIT_CONTRACT,
        topics: vec![DepositEventFilter::signature()],
        data: Bytes::from(data),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(H256(tx_hash)),
        log_index: Some(U256::from(log_index)),
        ..Default::default()
    }
}

pub fn block_hash_for(number: u64) -> H256 {
    H256(keccak256(number.to_be_bytes()))
}

#[derive(Default)]
pub struct MockChainClient {
    head: AtomicU64,
    chain_id: u64,
    logs: Mutex<Vec<Log>>,
    queries: Mutex<Vec<(u64, u64)>>,
    // Ranges wider than this many blocks are rejected as rate limited
    max_range_blocks: Mutex<Option<u64>>,
    // Ranges wider than this many blocks fail with a client-side timeout
    timeout_range_blocks: Mutex<Option<u64>>,
    // The next N queries fail with a non-transient provider error
    failing_queries: AtomicUsize,
    // Artificial latency keyed by the first block of a queried range
    delays: Mutex<HashMap<u64, Duration>>,
}

impl MockChainClient {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            chain_id: 1,
            ..Default::default()
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_deposit(&self, block_number: u64, log_index: u64) {
        let mut logs = self.logs.lock().unwrap();
        logs.push(deposit_log(block_number, log_index, block_number as u8));
        logs.sort_by_key(|log| (log.block_number, log.log_index));
    }

    pub fn add_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn set_max_range_blocks(&self, max: Option<u64>) {
        *self.max_range_blocks.lock().unwrap() = max;
    }

    pub fn set_timeout_range_blocks(&self, max: Option<u64>) {
        *self.timeout_range_blocks.lock().unwrap() = max;
    }

    pub fn fail_next_queries(&self, count: usize) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }

    pub fn delay_range_starting_at(&self, from_block: u64, delay: Duration) {
        self.delays.lock().unwrap().insert(from_block, delay);
    }

    pub fn queries(&self) -> Vec<(u64, u64)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn clear_queries(&self) {
        self.queries.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_block_number(&self) -> GuardianResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_block(&self, tag: BlockTag) -> GuardianResult<BlockRef> {
        let number = match tag {
            BlockTag::Latest => self.head.load(Ordering::SeqCst),
            BlockTag::Number(n) => n,
            BlockTag::Hash(_) => {
                return Err(GuardianError::ProviderError(
                    "lookup by hash not supported".to_string(),
                ))
            }
        };
        Ok(BlockRef {
            number,
            hash: block_hash_for(number),
        })
    }

    async fn get_chain_id(&self) -> GuardianResult<u64> {
        Ok(self.chain_id)
    }

    async fn query_logs(
        &self,
        address: EthAddress,
        event_signature: H256,
        from_block: u64,
        to_block: u64,
    ) -> GuardianResult<Vec<Log>> {
        self.queries.lock().unwrap().push((from_block, to_block));
        let delay = self.delays.lock().unwrap().get(&from_block).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GuardianError::ProviderError(
                "connection reset by peer".to_string(),
            ));
        }
        let timeout_range = *self.timeout_range_blocks.lock().unwrap();
        if let Some(max) = timeout_range {
            if to_block - from_block + 1 > max {
                return Err(classify_provider_error(&ProviderError::CustomError(
                    "error sending request: operation timed out".to_string(),
                )));
            }
        }
        let max_range = *self.max_range_blocks.lock().unwrap();
        if let Some(max) = max_range {
            if to_block - from_block + 1 > max {
                return Err(GuardianError::TransientProviderError(
                    "429 Too Many Requests".to_string(),
                ));
            }
        }
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                log.address == address
                    && log.topics.first() == Some(&event_signature)
                    && block >= from_block
                    && block <= to_block
            })
            .cloned()
            .collect())
    }
}

pub struct MockLocator {
    addresses: Mutex<HashMap<ContractRole, EthAddress>>,
    resolve_count: AtomicUsize,
}

impl MockLocator {
    pub fn new() -> Self {
        let addresses = HashMap::from([
            (ContractRole::Deposit, DEPOSIT_CONTRACT),
            (ContractRole::Security, SECURITY_CONTRACT),
        ]);
        Self {
            addresses: Mutex::new(addresses),
            resolve_count: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, role: ContractRole, address: EthAddress) {
        self.addresses.lock().unwrap().insert(role, address);
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractLocator for MockLocator {
    async fn resolve(&self, role: ContractRole) -> GuardianResult<EthAddress> {
        self.resolve_count.fetch_add(1, Ordering::SeqCst);
        self.addresses
            .lock()
            .unwrap()
            .get(&role)
            .copied()
            .ok_or_else(|| GuardianError::ContractResolutionError(role.as_str().to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct SubmittedPause {
    pub at: EthAddress,
    pub attestation: PauseAttestation,
    pub signature: GuardianSignature,
}

#[derive(Default)]
pub struct MockSecurityContract {
    paused: AtomicBool,
    guardians: Mutex<Vec<EthAddress>>,
    prefix_calls: AtomicUsize,
    paused_checks: AtomicUsize,
    submitted: Mutex<Vec<SubmittedPause>>,
    submit_attempts: AtomicUsize,
    submit_delay: Mutex<Option<Duration>>,
    fail_submit: AtomicBool,
    drop_transactions: AtomicBool,
}

impl MockSecurityContract {
    pub fn new(guardians: Vec<EthAddress>) -> Self {
        Self {
            guardians: Mutex::new(guardians),
            ..Default::default()
        }
    }

    /// Prefix served for `kind` by the contract deployed at `at`.
    pub fn prefix_for(at: EthAddress, kind: AttestationKind) -> [u8; 32] {
        let mut seed = at.as_bytes().to_vec();
        seed.extend_from_slice(kind.as_str().as_bytes());
        keccak256(seed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_guardians(&self, guardians: Vec<EthAddress>) {
        *self.guardians.lock().unwrap() = guardians;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_submissions(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub fn drop_transactions(&self) {
        self.drop_transactions.store(true, Ordering::SeqCst);
    }

    pub fn prefix_calls(&self) -> usize {
        self.prefix_calls.load(Ordering::SeqCst)
    }

    pub fn paused_checks(&self) -> usize {
        self.paused_checks.load(Ordering::SeqCst)
    }

    /// Every `submit_pause` call, including failed ones.
    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<SubmittedPause> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecurityContract for MockSecurityContract {
    async fn message_prefix(
        &self,
        at: EthAddress,
        kind: AttestationKind,
    ) -> GuardianResult<[u8; 32]> {
        self.prefix_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::prefix_for(at, kind))
    }

    async fn guardians(&self, _at: EthAddress, _block: BlockTag) -> GuardianResult<Vec<EthAddress>> {
        Ok(self.guardians.lock().unwrap().clone())
    }

    async fn is_deposits_paused(&self, _at: EthAddress) -> GuardianResult<bool> {
        self.paused_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.paused.load(Ordering::SeqCst))
    }

    async fn submit_pause(
        &self,
        at: EthAddress,
        attestation: &PauseAttestation,
        signature: &GuardianSignature,
    ) -> GuardianResult<TxHash> {
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(GuardianError::TransactionSubmissionError(
                "execution reverted".to_string(),
            ));
        }
        self.submitted.lock().unwrap().push(SubmittedPause {
            at,
            attestation: attestation.clone(),
            signature: *signature,
        });
        self.paused.store(true, Ordering::SeqCst);
        Ok(TxHash::repeat_byte(0xab))
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        _confirmations: usize,
    ) -> GuardianResult<Option<TransactionReceipt>> {
        if self.drop_transactions.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(1_000u64)),
            status: Some(U64::from(1u64)),
            ..Default::default()
        }))
    }
}
