// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ChainSyncError, ChainSyncResult};
use chrono::{DateTime, Utc};
pub use ethers::types::Address as EthAddress;
pub use ethers::types::H256 as EthTransactionHash;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use strum_macros::Display;

/// Inclusive block range, matching the node's native log filter semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> ChainSyncResult<Self> {
        if from > to {
            return Err(ChainSyncError::InvalidBlockRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Number of blocks covered, both ends included. Saturates at `u64::MAX`.
    pub fn block_count(&self) -> u64 {
        (self.to - self.from).saturating_add(1)
    }

    /// Split into consecutive sub-ranges of at most `max_len` blocks.
    pub fn chunks(&self, max_len: u64) -> Vec<BlockRange> {
        let max_len = max_len.max(1);
        let mut chunks = Vec::new();
        let mut start = self.from;
        loop {
            let end = start.saturating_add(max_len - 1).min(self.to);
            chunks.push(BlockRange {
                from: start,
                to: end,
            });
            if end >= self.to {
                break;
            }
            start = end + 1;
        }
        chunks
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// One decoded `Launched(address eip20, address escrow)` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedEvent {
    pub escrow_address: EthAddress,
    pub token_address: EthAddress,
    pub transaction_hash: EthTransactionHash,
    /// Contract that emitted the log
    pub factory_address: EthAddress,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
}

/// Escrow lifecycle with application numbering, which starts at 1.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum EscrowStatus {
    Launched = 1,
    Pending = 2,
    Partial = 3,
    Paid = 4,
    Complete = 5,
    Cancelled = 6,
}

impl EscrowStatus {
    /// Maps the contract's zero-based status to the application enum by
    /// adding one. Raw 0 is `Launched`, raw 1 is `Pending`.
    pub fn from_onchain(raw: u8) -> Option<Self> {
        let shifted = raw.checked_add(1)?;
        EscrowStatus::try_from(shifted).ok()
    }
}

/// Result of reading an escrow's manifest and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowInfo {
    pub manifest_url: String,
    pub raw_status: u8,
}

impl EscrowInfo {
    pub fn status(&self) -> Option<EscrowStatus> {
        EscrowStatus::from_onchain(self.raw_status)
    }

    /// Only pending escrows with a manifest become jobs.
    pub fn is_dispatchable(&self) -> bool {
        self.status() == Some(EscrowStatus::Pending) && !self.manifest_url.is_empty()
    }

    /// True while the escrow can still become dispatchable: it is `Launched`,
    /// or `Pending` without a manifest yet.
    pub fn may_become_dispatchable(&self) -> bool {
        matches!(
            self.status(),
            Some(EscrowStatus::Launched) | Some(EscrowStatus::Pending)
        )
    }

    pub fn job_for(
        &self,
        escrow_address: EthAddress,
        factory_address: EthAddress,
        launched_at: DateTime<Utc>,
    ) -> Option<EscrowJob> {
        if !self.is_dispatchable() {
            return None;
        }
        Some(EscrowJob {
            escrow_address,
            manifest_url: self.manifest_url.clone(),
            launched_at,
            factory_address,
        })
    }
}

/// Payload handed to the job intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowJob {
    #[serde(rename = "address", serialize_with = "serialize_checksum")]
    pub escrow_address: EthAddress,
    pub manifest_url: String,
    /// When this process detected the escrow, not when it was launched on chain
    pub launched_at: DateTime<Utc>,
    #[serde(rename = "factory", serialize_with = "serialize_checksum")]
    pub factory_address: EthAddress,
}

fn serialize_checksum<S: Serializer>(
    address: &EthAddress,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ethers::utils::to_checksum(address, None))
}

/// Counters for one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub range: Option<BlockRange>,
    pub logs_fetched: usize,
    pub events_decoded: usize,
    pub decode_failures: usize,
    pub escrows_recorded: usize,
    pub escrows_rejected: usize,
    pub corroboration_failures: usize,
    pub inspection_failures: usize,
    pub jobs_dispatched: usize,
    pub dispatch_failures: usize,
    /// Recorded escrows still waiting for a job after this pass
    pub awaiting_dispatch: usize,
}
