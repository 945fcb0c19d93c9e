// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardianError {
    // Rate limit or timeout reported by the Ethereum provider
    #[error("transient provider error: {0}")]
    TransientProviderError(String),
    // Any other Ethereum provider failure
    #[error("provider error: {0}")]
    ProviderError(String),
    // Malformed block range, never retried
    #[error("invalid block range [{start}, {end}]")]
    InvalidBlockRange { start: u64, end: u64 },
    // A log that does not decode as a deposit event
    #[error("invalid deposit event log: {0}")]
    InvalidEventLog(String),
    // Persisted cache was written by another build
    #[error("deposit cache version mismatch: found {found}, running {expected}")]
    CacheVersionMismatch { found: String, expected: String },
    // Stale cache could not be deleted
    #[error("failed to wipe deposit cache: {0}")]
    CacheWipeFailed(String),
    #[error("cache store error: {0}")]
    CacheStoreError(String),
    #[error("cache serialization error: {0}")]
    CacheSerializationError(String),
    // Missing message prefix or signing failure
    #[error("signature protocol error: {0}")]
    SignatureProtocolError(String),
    // Locator could not resolve a contract role
    #[error("contract resolution error: {0}")]
    ContractResolutionError(String),
    // Pause transaction was rejected, reverted or dropped
    #[error("transaction submission error: {0}")]
    TransactionSubmissionError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl GuardianError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            GuardianError::TransientProviderError(_) => "transient_provider_error",
            GuardianError::ProviderError(_) => "provider_error",
            GuardianError::InvalidBlockRange { .. } => "invalid_block_range",
            GuardianError::InvalidEventLog(_) => "invalid_event_log",
            GuardianError::CacheVersionMismatch { .. } => "cache_version_mismatch",
            GuardianError::CacheWipeFailed(_) => "cache_wipe_failed",
            GuardianError::CacheStoreError(_) => "cache_store_error",
            GuardianError::CacheSerializationError(_) => "cache_serialization_error",
            GuardianError::SignatureProtocolError(_) => "signature_protocol_error",
            GuardianError::ContractResolutionError(_) => "contract_resolution_error",
            GuardianError::TransactionSubmissionError(_) => "transaction_submission_error",
            GuardianError::InternalError(_) => "internal_error",
        }
    }

    /// Whether the read path may retry the failed request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuardianError::TransientProviderError(_) | GuardianError::ProviderError(_)
        )
    }
}

pub type GuardianResult<T> = Result<T, GuardianError>;
