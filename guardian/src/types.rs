// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::DepositEventFilter;
use crate::error::{GuardianError, GuardianResult};
use ethers::types::{Address as EthAddress, BlockId, BlockNumber, Bytes, Log, Signature, H256, U256};
use serde::{Deserialize, Serialize};

/// A deposit observed on the deposit contract. Never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub pubkey: Bytes,
    pub withdrawal_credentials: Bytes,
    pub amount: Bytes,
    pub signature: Bytes,
    pub transaction_hash: H256,
    pub block_number: u64,
    pub log_index: u64,
}

impl DepositEvent {
    pub fn try_from_log(log: Log) -> GuardianResult<Self> {
        let block_number = log
            .block_number
            .ok_or_else(|| GuardianError::InvalidEventLog("log without block number".into()))?
            .as_u64();
        let transaction_hash = log.transaction_hash.ok_or_else(|| {
            GuardianError::InvalidEventLog(format!("log at block {} without tx hash", block_number))
        })?;
        let log_index = log.log_index.map(|i| i.as_u64()).unwrap_or_default();
        let decoded: DepositEventFilter = ethers::contract::parse_log(log).map_err(|e| {
            GuardianError::InvalidEventLog(format!(
                "tx {:?} log {}: {}",
                transaction_hash, log_index, e
            ))
        })?;
        Ok(Self {
            pubkey: decoded.pubkey,
            withdrawal_credentials: decoded.withdrawal_credentials,
            amount: decoded.amount,
            signature: decoded.signature,
            transaction_hash,
            block_number,
            log_index,
        })
    }
}

/// Persisted replica of deposit events covering `[start_block, end_block]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEventCache {
    pub events: Vec<DepositEvent>,
    pub start_block: u64,
    pub end_block: u64,
    pub version: String,
}

impl DepositEventCache {
    pub fn empty(block: u64, version: impl Into<String>) -> Self {
        Self {
            events: vec![],
            start_block: block,
            end_block: block,
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: H256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
    Hash(H256),
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockId::Number(BlockNumber::Latest),
            BlockTag::Number(n) => BlockId::Number(BlockNumber::Number(n.into())),
            BlockTag::Hash(h) => BlockId::Hash(h),
        }
    }
}

/// Position of this node in the on-chain guardian set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianIndex {
    Member(usize),
    NotMember,
}

impl GuardianIndex {
    pub const NOT_MEMBER_SENTINEL: i64 = -1;

    pub fn from_set(guardians: &[EthAddress], address: EthAddress) -> Self {
        guardians
            .iter()
            .position(|g| *g == address)
            .map(GuardianIndex::Member)
            .unwrap_or(GuardianIndex::NotMember)
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            GuardianIndex::Member(i) => *i as i64,
            GuardianIndex::NotMember => Self::NOT_MEMBER_SENTINEL,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, GuardianIndex::Member(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationKind {
    Deposit,
    Pause,
}

impl AttestationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationKind::Deposit => "deposit",
            AttestationKind::Pause => "pause",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositAttestation {
    pub block_number: u64,
    pub block_hash: H256,
    pub deposit_root: H256,
    pub validator_indices: Vec<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseAttestation {
    pub block_number: u64,
    pub validator_index: u64,
    pub slash_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationMessage {
    Deposit(DepositAttestation),
    Pause(PauseAttestation),
}

impl AttestationMessage {
    pub fn kind(&self) -> AttestationKind {
        match self {
            AttestationMessage::Deposit(_) => AttestationKind::Deposit,
            AttestationMessage::Pause(_) => AttestationKind::Pause,
        }
    }
}

/// ECDSA signature with a recovery id of 27 or 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardianSignature {
    pub r: H256,
    pub s: H256,
    pub v: u8,
}

impl GuardianSignature {
    /// EIP-2098 `vs`: `s` with the recovery parity folded into the top bit.
    pub fn vs(&self) -> H256 {
        let mut vs = self.s;
        if self.v == 28 {
            vs.0[0] |= 0x80;
        }
        vs
    }

    pub fn to_compact(&self) -> (H256, H256) {
        (self.r, self.vs())
    }

    /// 65 byte `r || s || v` encoding.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_bytes());
        out[32..64].copy_from_slice(self.s.as_bytes());
        out[64] = self.v;
        out
    }
}

impl TryFrom<Signature> for GuardianSignature {
    type Error = GuardianError;

    fn try_from(sig: Signature) -> Result<Self, Self::Error> {
        let v = match sig.v {
            0 | 27 => 27,
            1 | 28 => 28,
            other => {
                return Err(GuardianError::SignatureProtocolError(format!(
                    "unexpected recovery id {}",
                    other
                )))
            }
        };
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        sig.r.to_big_endian(&mut r);
        sig.s.to_big_endian(&mut s);
        Ok(Self {
            r: H256(r),
            s: H256(s),
            v,
        })
    }
}

/// An externally detected condition requiring an emergency pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub validator_index: u64,
    pub slash_amount: U256,
}
