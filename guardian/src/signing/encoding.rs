// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Byte layouts of guardian attestations as verified on chain.
//!
//! `Canonical` is Solidity `abi.encode(prefix, fields...)`: every static
//! field occupies one 32-byte word and dynamic arrays are written as an
//! offset in the head plus a length-prefixed tail. `Packed` is the earlier
//! `abi.encodePacked` layout, where arrays carry no length word.

use crate::error::{GuardianError, GuardianResult};
use crate::types::{AttestationMessage, DepositAttestation, PauseAttestation};
use ethers::abi::Token;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingVersion {
    Packed,
    #[default]
    Canonical,
}

pub trait AttestationEncoding {
    /// Message fields in verifier order, without the prefix.
    fn field_tokens(&self) -> Vec<Token>;

    fn encode(&self, prefix: &[u8; 32], version: EncodingVersion) -> GuardianResult<Vec<u8>> {
        let mut tokens = vec![Token::FixedBytes(prefix.to_vec())];
        tokens.extend(self.field_tokens());
        match version {
            EncodingVersion::Canonical => Ok(ethers::abi::encode(&tokens)),
            EncodingVersion::Packed => {
                let mut packed = Vec::with_capacity(tokens.len() * 32);
                for token in &tokens {
                    pack_token(token, &mut packed)?;
                }
                Ok(packed)
            }
        }
    }
}

// Solidity `abi.encodePacked`: uint256 values keep their full 32-byte width
// and array elements are written as consecutive words with no length.
fn pack_token(token: &Token, out: &mut Vec<u8>) -> GuardianResult<()> {
    match token {
        Token::FixedBytes(bytes) => out.extend_from_slice(bytes),
        Token::Uint(value) => {
            let mut word = [0u8; 32];
            value.to_big_endian(&mut word);
            out.extend_from_slice(&word);
        }
        Token::Array(items) => {
            for item in items {
                pack_token(item, out)?;
            }
        }
        other => {
            return Err(GuardianError::SignatureProtocolError(format!(
                "unsupported token in packed attestation: {:?}",
                other
            )))
        }
    }
    Ok(())
}

impl AttestationEncoding for DepositAttestation {
    fn field_tokens(&self) -> Vec<Token> {
        vec![
            Token::Uint(U256::from(self.block_number)),
            Token::FixedBytes(self.block_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.deposit_root.as_bytes().to_vec()),
            Token::Array(
                self.validator_indices
                    .iter()
                    .map(|index| Token::Uint(*index))
                    .collect(),
            ),
        ]
    }
}

impl AttestationEncoding for PauseAttestation {
    fn field_tokens(&self) -> Vec<Token> {
        vec![
            Token::Uint(U256::from(self.block_number)),
            Token::Uint(U256::from(self.validator_index)),
            Token::Uint(self.slash_amount),
        ]
    }
}

impl AttestationEncoding for AttestationMessage {
    fn field_tokens(&self) -> Vec<Token> {
        match self {
            AttestationMessage::Deposit(m) => m.field_tokens(),
            AttestationMessage::Pause(m) => m.field_tokens(),
        }
    }
}
