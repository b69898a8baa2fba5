// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only chain capabilities used by the synchronizer.

use crate::config::RetryConfig;
use crate::error::ChainSyncResult;
use crate::retry_with_policy;
use crate::types::{BlockRange, EthAddress};
use async_trait::async_trait;
use ethers::types::Log;
use std::sync::Arc;

/// Log queries and chain head.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Logs emitted by any of `addresses` within the inclusive `range`.
    /// A range that is too large for the node fails; callers chunk.
    async fn get_logs(
        &self,
        range: BlockRange,
        addresses: &[EthAddress],
    ) -> ChainSyncResult<Vec<Log>>;

    async fn latest_block_number(&self) -> ChainSyncResult<u64>;
}

/// Typed reads against an Escrow contract.
#[async_trait]
pub trait EscrowReader: Send + Sync {
    async fn launcher(&self, escrow: EthAddress) -> ChainSyncResult<EthAddress>;

    async fn manifest_url(&self, escrow: EthAddress) -> ChainSyncResult<String>;

    /// Raw zero-based on-chain status.
    async fn status(&self, escrow: EthAddress) -> ChainSyncResult<u8>;
}

/// Wraps an `EscrowReader` so every call is retried on transient failures.
#[derive(Clone)]
pub struct RetryingEscrowReader {
    inner: Arc<dyn EscrowReader>,
    policy: RetryConfig,
}

impl RetryingEscrowReader {
    pub fn new(inner: Arc<dyn EscrowReader>, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EscrowReader for RetryingEscrowReader {
    async fn launcher(&self, escrow: EthAddress) -> ChainSyncResult<EthAddress> {
        retry_with_policy!(self.inner.launcher(escrow), self.policy)
    }

    async fn manifest_url(&self, escrow: EthAddress) -> ChainSyncResult<String> {
        retry_with_policy!(self.inner.manifest_url(escrow), self.policy)
    }

    async fn status(&self, escrow: EthAddress) -> ChainSyncResult<u8> {
        retry_with_policy!(self.inner.status(escrow), self.policy)
    }
}
