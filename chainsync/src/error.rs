// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::ContractError;
use ethers::providers::{Middleware, ProviderError};
use ethers::types::{Address as EthAddress, H256};
use std::time::Duration;

/// Why a single log could not be turned into a `LaunchedEvent`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("topic0 {0:?} is not the Launched event signature")]
    SignatureMismatch(Option<H256>),
    #[error("malformed event data: {0}")]
    MalformedData(String),
    #[error("log has no transaction hash")]
    MissingTransactionHash,
}

/// A log that failed to decode, with enough context to find it again on chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "failed to decode log (emitter={emitter:?}, tx={tx_hash:?}, block={block_number:?}, index={log_index:?}): {kind}"
)]
pub struct DecodeError {
    pub emitter: EthAddress,
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainSyncError {
    // Log shape does not match the Launched ABI
    #[error(transparent)]
    Decode(#[from] DecodeError),
    // Read failed for a reason retrying will not fix (revert, ABI mismatch)
    #[error("chain read failed: {0}")]
    ChainRead(String),
    // Network or node failure, safe to retry
    #[error("transient chain read failure: {0}")]
    TransientChainRead(String),
    // A chain read exceeded the configured request timeout
    #[error("chain read timed out after {0:?}")]
    Timeout(Duration),
    // JobSink rejected a job
    #[error("failed to dispatch job for escrow {escrow:?}: {reason}")]
    Dispatch { escrow: EthAddress, reason: String },
    // Too many consecutive failed passes
    #[error("circuit breaker open after {consecutive_failures} consecutive failed passes")]
    CircuitOpen { consecutive_failures: u32 },
    #[error("invalid block range: from {from} is after to {to}")]
    InvalidBlockRange { from: u64, to: u64 },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChainSyncError {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainSyncError::TransientChainRead(_) | ChainSyncError::Timeout(_)
        )
    }

    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ChainSyncError::Decode(_) => "decode",
            ChainSyncError::ChainRead(_) => "chain_read",
            ChainSyncError::TransientChainRead(_) => "transient_chain_read",
            ChainSyncError::Timeout(_) => "timeout",
            ChainSyncError::Dispatch { .. } => "dispatch",
            ChainSyncError::CircuitOpen { .. } => "circuit_open",
            ChainSyncError::InvalidBlockRange { .. } => "invalid_block_range",
            ChainSyncError::Config(_) => "config",
        }
    }
}

impl From<ProviderError> for ChainSyncError {
    fn from(e: ProviderError) -> Self {
        ChainSyncError::TransientChainRead(format!("{:?}", e))
    }
}

impl<M: Middleware> From<ContractError<M>> for ChainSyncError {
    fn from(e: ContractError<M>) -> Self {
        match e {
            ContractError::MiddlewareError { .. } | ContractError::ProviderError { .. } => {
                ChainSyncError::TransientChainRead(e.to_string())
            }
            // Reverts and ABI/decoding mismatches will fail the same way next time
            _ => ChainSyncError::ChainRead(e.to_string()),
        }
    }
}

pub type ChainSyncResult<T> = Result<T, ChainSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ChainSyncError> {
        vec![
            ChainSyncError::Decode(DecodeError {
                emitter: EthAddress::zero(),
                tx_hash: None,
                block_number: Some(1),
                log_index: Some(0),
                kind: DecodeErrorKind::MissingTransactionHash,
            }),
            ChainSyncError::ChainRead("revert".to_string()),
            ChainSyncError::TransientChainRead("connection reset".to_string()),
            ChainSyncError::Timeout(Duration::from_secs(30)),
            ChainSyncError::Dispatch {
                escrow: EthAddress::repeat_byte(1),
                reason: "closed".to_string(),
            },
            ChainSyncError::CircuitOpen {
                consecutive_failures: 5,
            },
            ChainSyncError::InvalidBlockRange { from: 10, to: 1 },
            ChainSyncError::Config("bad".to_string()),
        ]
    }

    #[test]
    fn test_only_network_failures_are_transient() {
        for error in all_variants() {
            let expected = matches!(
                error,
                ChainSyncError::TransientChainRead(_) | ChainSyncError::Timeout(_)
            );
            assert_eq!(error.is_transient(), expected, "{:?}", error);
        }
    }

    /// error_type values end up as Prometheus label values
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        for error in all_variants() {
            let error_type = error.error_type();
            assert!(!error_type.is_empty());
            for c in error_type.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "error_type '{}' contains invalid character '{}'",
                    error_type,
                    c
                );
            }
            assert!(!error_type.starts_with('_') && !error_type.ends_with('_'));
        }
    }

    #[test]
    fn test_error_type_payload_independence() {
        let err1 = ChainSyncError::ChainRead("short".to_string());
        let err2 = ChainSyncError::ChainRead("a much longer message".to_string());
        assert_eq!(err1.error_type(), err2.error_type());
    }

    #[test]
    fn test_decode_error_display_carries_context() {
        let tx_hash = H256::repeat_byte(0xab);
        let error = DecodeError {
            emitter: EthAddress::repeat_byte(7),
            tx_hash: Some(tx_hash),
            block_number: Some(42),
            log_index: Some(3),
            kind: DecodeErrorKind::MalformedData("short buffer".to_string()),
        };
        let display = ChainSyncError::from(error).to_string();
        assert!(display.contains("block=Some(42)"));
        assert!(display.contains("index=Some(3)"));
        assert!(display.contains("short buffer"));
        assert!(display.contains(&format!("{:?}", tx_hash)));
    }

    #[test]
    fn test_provider_error_is_transient() {
        let error: ChainSyncError =
            ProviderError::CustomError("connection refused".to_string()).into();
        assert!(error.is_transient());
        assert_eq!(error.error_type(), "transient_chain_read");
    }
}
