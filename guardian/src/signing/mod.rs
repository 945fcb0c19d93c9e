// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Guardian attestation signing.
//!
//! Messages are `keccak256(encode(prefix, fields))` signed with deterministic
//! ECDSA (RFC 6979), so the same key and message always produce the same
//! signature. Prefixes are fetched from the security contract and cached per
//! kind together with the generation of the security handle they came from.
//! When the registry replaces that handle the cached prefixes are refetched.

pub mod encoding;

use crate::contracts::{ContractRegistry, ContractRole};
use crate::error::{GuardianError, GuardianResult};
use crate::eth_contracts::SecurityContract;
use crate::metrics::GuardianMetrics;
use crate::types::{AttestationKind, AttestationMessage, BlockTag, GuardianIndex, GuardianSignature};
use encoding::{AttestationEncoding, EncodingVersion};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address as EthAddress, H256};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct CachedPrefix {
    generation: u64,
    prefix: [u8; 32],
}

pub struct AttestationSigner {
    wallet: LocalWallet,
    registry: Arc<ContractRegistry>,
    security: Arc<dyn SecurityContract>,
    encoding: EncodingVersion,
    prefixes: Mutex<HashMap<AttestationKind, CachedPrefix>>,
    metrics: Option<Arc<GuardianMetrics>>,
}

impl AttestationSigner {
    pub fn new(
        wallet: LocalWallet,
        registry: Arc<ContractRegistry>,
        security: Arc<dyn SecurityContract>,
    ) -> Self {
        Self {
            wallet,
            registry,
            security,
            encoding: EncodingVersion::default(),
            prefixes: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_encoding(mut self, encoding: EncodingVersion) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GuardianMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn address(&self) -> EthAddress {
        self.wallet.address()
    }

    pub fn encoding(&self) -> EncodingVersion {
        self.encoding
    }

    pub async fn message_prefix(&self, kind: AttestationKind) -> GuardianResult<[u8; 32]> {
        let handle = self.registry.handle(ContractRole::Security).await?;
        let mut prefixes = self.prefixes.lock().await;
        if let Some(cached) = prefixes.get(&kind) {
            if cached.generation == handle.generation {
                return Ok(cached.prefix);
            }
            debug!(
                "[AttestationSigner] Security contract re-initialized, refetching {} prefix",
                kind.as_str()
            );
        }
        let prefix = self.security.message_prefix(handle.address, kind).await?;
        info!(
            "[AttestationSigner] Using {} message prefix 0x{} from {:?}",
            kind.as_str(),
            hex::encode(prefix),
            handle.address
        );
        prefixes.insert(
            kind,
            CachedPrefix {
                generation: handle.generation,
                prefix,
            },
        );
        Ok(prefix)
    }

    pub async fn encode(&self, message: &AttestationMessage) -> GuardianResult<Vec<u8>> {
        let prefix = self.message_prefix(message.kind()).await?;
        message.encode(&prefix, self.encoding)
    }

    pub async fn sign(&self, message: &AttestationMessage) -> GuardianResult<GuardianSignature> {
        let encoded = self.encode(message).await?;
        let signature = self.sign_digest(keccak256(encoded))?;
        if let Some(metrics) = &self.metrics {
            metrics
                .attestations_signed
                .with_label_values(&[message.kind().as_str()])
                .inc();
        }
        Ok(signature)
    }

    pub fn sign_digest(&self, digest: [u8; 32]) -> GuardianResult<GuardianSignature> {
        let signature = self
            .wallet
            .sign_hash(H256(digest))
            .map_err(|e| GuardianError::SignatureProtocolError(e.to_string()))?;
        GuardianSignature::try_from(signature)
    }

    /// Position of this guardian in the on-chain set at `block`.
    pub async fn guardian_index(&self, block: BlockTag) -> GuardianResult<GuardianIndex> {
        let security = self.registry.address(ContractRole::Security).await?;
        let guardians = self.security.guardians(security, block).await?;
        let index = GuardianIndex::from_set(&guardians, self.address());
        if !index.is_member() {
            warn!(
                "[AttestationSigner] {:?} is not in the guardian set of {} members at {:?}",
                self.address(),
                guardians.len(),
                block
            );
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        test_wallet, MockLocator, MockSecurityContract, SECURITY_CONTRACT,
    };
    use crate::types::{DepositAttestation, PauseAttestation};
    use ethers::types::{Signature, U256};

    fn setup(
        guardians: Vec<EthAddress>,
    ) -> (
        Arc<MockLocator>,
        Arc<ContractRegistry>,
        Arc<MockSecurityContract>,
        AttestationSigner,
    ) {
        crate::test_utils::init_test_logging();
        let locator = Arc::new(MockLocator::new());
        let registry = Arc::new(ContractRegistry::new(locator.clone()));
        let security = Arc::new(MockSecurityContract::new(guardians));
        let signer = AttestationSigner::new(test_wallet(), registry.clone(), security.clone());
        (locator, registry, security, signer)
    }

    fn pause_message() -> AttestationMessage {
        AttestationMessage::Pause(PauseAttestation {
            block_number: 19_000_000,
            validator_index: 42,
            slash_amount: U256::exp10(18),
        })
    }

    fn recover(signature: &GuardianSignature, digest: [u8; 32]) -> EthAddress {
        Signature {
            r: U256::from_big_endian(signature.r.as_bytes()),
            s: U256::from_big_endian(signature.s.as_bytes()),
            v: signature.v as u64,
        }
        .recover(H256(digest))
        .unwrap()
    }

    #[tokio::test]
    async fn test_signature_is_deterministic() {
        let (_locator, _registry, _security, signer) = setup(vec![]);
        let first = signer.sign(&pause_message()).await.unwrap();
        let second = signer.sign(&pause_message()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_bytes(), second.to_bytes());

        // A fresh signer with the same key agrees
        let (_locator, _registry, _security, other) = setup(vec![]);
        assert_eq!(other.sign(&pause_message()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_signature_recovers_to_guardian() {
        let (_locator, _registry, _security, signer) = setup(vec![]);
        let message = pause_message();
        let signature = signer.sign(&message).await.unwrap();
        let digest = keccak256(signer.encode(&message).await.unwrap());
        assert_eq!(recover(&signature, digest), signer.address());
    }

    #[tokio::test]
    async fn test_prefix_is_domain_separating() {
        let (_locator, _registry, _security, signer) = setup(vec![]);
        let deposit_prefix = signer.message_prefix(AttestationKind::Deposit).await.unwrap();
        let pause_prefix = signer.message_prefix(AttestationKind::Pause).await.unwrap();
        assert_ne!(deposit_prefix, pause_prefix);
        assert_eq!(
            pause_prefix,
            MockSecurityContract::prefix_for(SECURITY_CONTRACT, AttestationKind::Pause)
        );

        let deposit = AttestationMessage::Deposit(DepositAttestation {
            block_number: 1,
            block_hash: H256::repeat_byte(1),
            deposit_root: H256::repeat_byte(2),
            validator_indices: vec![U256::from(3)],
        });
        let encoded = signer.encode(&deposit).await.unwrap();
        assert_eq!(&encoded[..32], &deposit_prefix);
    }

    #[tokio::test]
    async fn test_prefix_cached_until_security_contract_changes() {
        let (locator, registry, security, signer) = setup(vec![]);
        let before = signer.sign(&pause_message()).await.unwrap();
        signer.sign(&pause_message()).await.unwrap();
        assert_eq!(security.prefix_calls(), 1);

        // Same address on refresh keeps the cache
        registry.refresh_volatile().await.unwrap();
        signer.sign(&pause_message()).await.unwrap();
        assert_eq!(security.prefix_calls(), 1);

        let moved = EthAddress::repeat_byte(0x42);
        locator.set(ContractRole::Security, moved);
        registry.refresh_volatile().await.unwrap();
        let after = signer.sign(&pause_message()).await.unwrap();
        assert_eq!(security.prefix_calls(), 2);
        assert_eq!(
            signer.message_prefix(AttestationKind::Pause).await.unwrap(),
            MockSecurityContract::prefix_for(moved, AttestationKind::Pause)
        );
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_encoding_version_changes_digest() {
        let (locator, registry, security, canonical) = setup(vec![]);
        let packed = AttestationSigner::new(test_wallet(), registry, security)
            .with_encoding(EncodingVersion::Packed);
        let deposit = AttestationMessage::Deposit(DepositAttestation {
            block_number: 1,
            block_hash: H256::repeat_byte(1),
            deposit_root: H256::repeat_byte(2),
            validator_indices: vec![U256::from(3), U256::from(4)],
        });
        assert_ne!(
            canonical.sign(&deposit).await.unwrap(),
            packed.sign(&deposit).await.unwrap()
        );
        assert!(locator.resolve_count() >= 1);
    }

    #[tokio::test]
    async fn test_guardian_index_lookup() {
        let me = test_wallet().address();
        let others = [EthAddress::repeat_byte(1), EthAddress::repeat_byte(2)];
        let (_locator, _registry, security, signer) = setup(vec![others[0], others[1], me]);
        assert_eq!(
            signer.guardian_index(BlockTag::Latest).await.unwrap(),
            GuardianIndex::Member(2)
        );

        security.set_guardians(others.to_vec());
        let index = signer.guardian_index(BlockTag::Number(10)).await.unwrap();
        assert_eq!(index, GuardianIndex::NotMember);
        assert_eq!(index.as_i64(), -1);
    }
}
