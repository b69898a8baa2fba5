// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory chain and log builders shared by unit tests.

use crate::abi::launched_event;
use crate::chain::{ChainClient, EscrowReader};
use crate::error::{ChainSyncError, ChainSyncResult};
use crate::types::{BlockRange, EthAddress};
use async_trait::async_trait;
use ethers::types::{Log, TxHash, U256, U64};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
struct FakeEscrow {
    launcher: EthAddress,
    manifest_url: String,
    raw_status: u8,
}

// Chain double used in test environments. Every handle shares state.
#[derive(Clone, Debug, Default)]
pub struct FakeChain {
    latest_block: Arc<AtomicU64>,
    logs: Arc<Mutex<Vec<Log>>>,
    escrows: Arc<Mutex<HashMap<EthAddress, FakeEscrow>>>,
    // Transient failures still to be returned, per escrow, for any read
    pending_read_failures: Arc<Mutex<HashMap<EthAddress, u32>>>,
    // Escrows whose manifest/status reads revert
    broken_inspections: Arc<Mutex<HashSet<EthAddress>>>,
    read_calls: Arc<Mutex<HashMap<EthAddress, u32>>>,
    pending_get_logs_failures: Arc<AtomicU32>,
    get_logs_requests: Arc<Mutex<Vec<BlockRange>>>,
    pending_latest_block_failures: Arc<AtomicU32>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        if let Some(block) = log.block_number {
            self.latest_block
                .fetch_max(block.as_u64(), Ordering::SeqCst);
        }
        self.logs.lock().unwrap().push(log);
    }

    pub fn set_escrow(
        &self,
        escrow: EthAddress,
        launcher: EthAddress,
        manifest_url: &str,
        raw_status: u8,
    ) {
        self.escrows.lock().unwrap().insert(
            escrow,
            FakeEscrow {
                launcher,
                manifest_url: manifest_url.to_string(),
                raw_status,
            },
        );
    }

    /// Makes the next `count` reads against `escrow` fail transiently.
    pub fn fail_next_reads(&self, escrow: EthAddress, count: u32) {
        self.pending_read_failures
            .lock()
            .unwrap()
            .insert(escrow, count);
    }

    pub fn break_inspection(&self, escrow: EthAddress) {
        self.broken_inspections.lock().unwrap().insert(escrow);
    }

    pub fn repair_inspection(&self, escrow: EthAddress) {
        self.broken_inspections.lock().unwrap().remove(&escrow);
    }

    pub fn fail_next_get_logs(&self, count: u32) {
        self.pending_get_logs_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_latest_block(&self, count: u32) {
        self.pending_latest_block_failures
            .store(count, Ordering::SeqCst);
    }

    pub fn read_calls(&self, escrow: EthAddress) -> u32 {
        self.read_calls
            .lock()
            .unwrap()
            .get(&escrow)
            .copied()
            .unwrap_or_default()
    }

    pub fn get_logs_requests(&self) -> Vec<BlockRange> {
        self.get_logs_requests.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn begin_read(&self, escrow: EthAddress) -> ChainSyncResult<FakeEscrow> {
        *self.read_calls.lock().unwrap().entry(escrow).or_default() += 1;
        let mut pending = self.pending_read_failures.lock().unwrap();
        if let Some(remaining) = pending.get_mut(&escrow) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChainSyncError::TransientChainRead(format!(
                    "injected failure reading {:?}",
                    escrow
                )));
            }
        }
        self.escrows
            .lock()
            .unwrap()
            .get(&escrow)
            .cloned()
            .ok_or_else(|| ChainSyncError::ChainRead("execution reverted".to_string()))
    }

    fn begin_inspection(&self, escrow: EthAddress) -> ChainSyncResult<FakeEscrow> {
        let state = self.begin_read(escrow)?;
        if self.broken_inspections.lock().unwrap().contains(&escrow) {
            return Err(ChainSyncError::ChainRead(
                "execution reverted: status unavailable".to_string(),
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn get_logs(
        &self,
        range: BlockRange,
        addresses: &[EthAddress],
    ) -> ChainSyncResult<Vec<Log>> {
        self.get_logs_requests.lock().unwrap().push(range);
        if Self::take_failure(&self.pending_get_logs_failures) {
            return Err(ChainSyncError::TransientChainRead(
                "injected eth_getLogs failure".to_string(),
            ));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                block >= range.from && block <= range.to && addresses.contains(&log.address)
            })
            .cloned()
            .collect())
    }

    async fn latest_block_number(&self) -> ChainSyncResult<u64> {
        if Self::take_failure(&self.pending_latest_block_failures) {
            return Err(ChainSyncError::TransientChainRead(
                "injected eth_blockNumber failure".to_string(),
            ));
        }
        Ok(self.latest_block.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl EscrowReader for FakeChain {
    async fn launcher(&self, escrow: EthAddress) -> ChainSyncResult<EthAddress> {
        Ok(self.begin_read(escrow)?.launcher)
    }

    async fn manifest_url(&self, escrow: EthAddress) -> ChainSyncResult<String> {
        Ok(self.begin_inspection(escrow)?.manifest_url)
    }

    async fn status(&self, escrow: EthAddress) -> ChainSyncResult<u8> {
        Ok(self.begin_inspection(escrow)?.raw_status)
    }
}

/// A `Launched(token, escrow)` log emitted by `factory` in `block`.
pub fn launched_log(
    factory: EthAddress,
    token: EthAddress,
    escrow: EthAddress,
    block: u64,
) -> Log {
    let event = launched_event().unwrap();
    // Note: must use `encode` rather than `encode_packed`
    let data = ethers::abi::encode(&[
        ethers::abi::Token::Address(token),
        ethers::abi::Token::Address(escrow),
    ]);
    Log {
        address: factory,
        topics: vec![event.signature()],
        data: data.into(),
        block_hash: Some(TxHash::random()),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(TxHash::random()),
        log_index: Some(U256::zero()),
        ..Default::default()
    }
}

/// A log with the Launched topic but a data payload too short to decode.
pub fn malformed_log(factory: EthAddress, block: u64) -> Log {
    let mut log = launched_log(factory, EthAddress::zero(), EthAddress::zero(), block);
    log.data = vec![0u8; 7].into();
    log
}
