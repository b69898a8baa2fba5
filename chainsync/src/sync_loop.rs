// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! One synchronization pass: query, decode, filter, dedup, inspect, dispatch.

use crate::chain::{ChainClient, EscrowReader, RetryingEscrowReader};
use crate::config::{ChainSyncConfig, RetryConfig};
use crate::decoder::EventDecoder;
use crate::error::{ChainSyncError, ChainSyncResult};
use crate::inspector::EscrowInspector;
use crate::job_sink::JobSink;
use crate::launch_tracker::{LaunchTracker, RecordOutcome};
use crate::metrics::ChainSyncMetrics;
use crate::retry_with_policy;
use crate::types::{BlockRange, EthAddress, EthTransactionHash, PassSummary};
use chrono::Utc;
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tap::TapFallible;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_block_range: u64,
    pub max_concurrent_reads: usize,
    pub retry: RetryConfig,
}

impl SyncOptions {
    pub fn from_config(config: &ChainSyncConfig) -> Self {
        Self {
            max_block_range: config.max_block_range,
            max_concurrent_reads: config.max_concurrent_reads,
            retry: config.retry.clone(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_block_range: 10_000,
            max_concurrent_reads: 8,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Dispatched,
    // Not a job yet, inspected again next pass
    NotYetDispatchable,
    // Moved past `Pending` without becoming a job
    Retired,
    InspectionFailed,
    DispatchFailed,
}

// A recorded escrow whose job has not been dispatched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AwaitingEscrow {
    factory: EthAddress,
    tx_hash: EthTransactionHash,
}

pub struct SyncLoop {
    chain: Arc<dyn ChainClient>,
    reader: RetryingEscrowReader,
    decoder: EventDecoder,
    tracker: LaunchTracker,
    // Kept apart from the tracker, whose entries are never removed
    awaiting: BTreeMap<EthAddress, AwaitingEscrow>,
    inspector: EscrowInspector,
    sink: Arc<dyn JobSink>,
    options: SyncOptions,
    metrics: Option<Arc<ChainSyncMetrics>>,
}

impl SyncLoop {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        reader: Arc<dyn EscrowReader>,
        sink: Arc<dyn JobSink>,
        options: SyncOptions,
    ) -> ChainSyncResult<Self> {
        let reader = RetryingEscrowReader::new(reader, options.retry.clone());
        Ok(Self {
            chain,
            inspector: EscrowInspector::new(Arc::new(reader.clone())),
            reader,
            decoder: EventDecoder::new()?,
            tracker: LaunchTracker::new(),
            awaiting: BTreeMap::new(),
            sink,
            options,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<ChainSyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tracker(&self) -> &LaunchTracker {
        &self.tracker
    }

    /// Recorded escrows that have not produced a job yet.
    pub fn awaiting_dispatch(&self) -> Vec<EthAddress> {
        self.awaiting.keys().copied().collect()
    }

    /// Runs one pass over `range`. Returns an error only when the log query
    /// itself fails; per-log and per-escrow failures are counted in the
    /// summary and retried on a later pass where that makes sense.
    ///
    /// Every escrow recorded so far and not yet dispatched is inspected
    /// again, so a failed read, a `Launched` escrow or a rejected job gets
    /// another chance on the next pass. Dispatched escrows are never
    /// submitted twice.
    pub async fn run(
        &mut self,
        range: BlockRange,
        factory_addresses: &HashSet<EthAddress>,
        token_addresses: &HashSet<EthAddress>,
    ) -> ChainSyncResult<PassSummary> {
        let mut summary = PassSummary {
            range: Some(range),
            ..Default::default()
        };
        tracing::info!("[SyncLoop] Started synchronisation for blocks {}", range);

        let logs = self
            .fetch_logs(range, factory_addresses)
            .await
            .tap_err(|e| {
                tracing::error!(
                    "[SyncLoop] Log query for blocks {} failed, aborting pass: {:?}",
                    range,
                    e
                );
                self.record_error(e);
            })?;
        summary.logs_fetched = logs.len();

        let batch = self.decoder.decode_batch(&logs);
        summary.events_decoded = batch.events.len();
        summary.decode_failures = batch.failures.len();
        for failure in &batch.failures {
            self.record_error(&ChainSyncError::Decode(failure.clone()));
        }

        for event in &batch.events {
            match self
                .tracker
                .record_if_new(event, factory_addresses, token_addresses, &self.reader)
                .await
            {
                Ok(RecordOutcome::Recorded { escrow, factory }) => {
                    tracing::info!(
                        "[SyncLoop] New escrow spotted: escrow={:?}, factory={:?}, tx_hash={:?}, block={:?}",
                        escrow,
                        factory,
                        event.transaction_hash,
                        event.block_number
                    );
                    summary.escrows_recorded += 1;
                    self.awaiting.insert(
                        escrow,
                        AwaitingEscrow {
                            factory,
                            tx_hash: event.transaction_hash,
                        },
                    );
                }
                Ok(RecordOutcome::AlreadyRecorded) => {}
                Ok(outcome) => {
                    tracing::debug!(
                        "[SyncLoop] Ignoring Launched event: escrow={:?}, token={:?}, tx_hash={:?}, reason={}",
                        event.escrow_address,
                        event.token_address,
                        event.transaction_hash,
                        outcome.reason()
                    );
                    summary.escrows_rejected += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics
                            .launch_rejections
                            .with_label_values(&[outcome.reason()])
                            .inc();
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "[SyncLoop] Launcher lookup failed, will retry next pass: escrow={:?}, tx_hash={:?}, error={:?}",
                        event.escrow_address,
                        event.transaction_hash,
                        e
                    );
                    summary.corroboration_failures += 1;
                    self.record_error(&e);
                }
            }
        }

        let candidates: Vec<(EthAddress, AwaitingEscrow)> = self
            .awaiting
            .iter()
            .map(|(escrow, awaiting)| (*escrow, *awaiting))
            .collect();
        let this = &*self;
        let outcomes: Vec<(EthAddress, DispatchOutcome)> = futures::stream::iter(candidates)
            .map(move |(escrow, awaiting)| async move {
                let outcome = this
                    .inspect_and_dispatch(escrow, awaiting.factory, awaiting.tx_hash)
                    .await;
                (escrow, outcome)
            })
            .buffered(self.options.max_concurrent_reads.max(1))
            .collect()
            .await;
        for (escrow, outcome) in outcomes {
            match outcome {
                DispatchOutcome::Dispatched => {
                    summary.jobs_dispatched += 1;
                    self.awaiting.remove(&escrow);
                }
                DispatchOutcome::Retired => {
                    self.awaiting.remove(&escrow);
                }
                DispatchOutcome::NotYetDispatchable => {}
                DispatchOutcome::InspectionFailed => summary.inspection_failures += 1,
                DispatchOutcome::DispatchFailed => summary.dispatch_failures += 1,
            }
        }
        summary.awaiting_dispatch = self.awaiting.len();

        if let Some(metrics) = &self.metrics {
            metrics.logs_fetched.inc_by(summary.logs_fetched as u64);
            metrics.decode_failures.inc_by(summary.decode_failures as u64);
            metrics
                .escrows_recorded
                .inc_by(summary.escrows_recorded as u64);
            metrics
                .corroboration_failures
                .inc_by(summary.corroboration_failures as u64);
            metrics
                .inspection_failures
                .inc_by(summary.inspection_failures as u64);
            metrics.jobs_dispatched.inc_by(summary.jobs_dispatched as u64);
            metrics
                .dispatch_failures
                .inc_by(summary.dispatch_failures as u64);
            metrics.launch_tracker_size.set(self.tracker.len() as i64);
            metrics
                .escrows_awaiting_dispatch
                .set(self.awaiting.len() as i64);
        }
        tracing::info!(
            "[SyncLoop] Finished blocks {}: logs={}, decoded={}, recorded={}, dispatched={}, awaiting={}",
            range,
            summary.logs_fetched,
            summary.events_decoded,
            summary.escrows_recorded,
            summary.jobs_dispatched,
            summary.awaiting_dispatch
        );
        Ok(summary)
    }

    // Every chunk must succeed before any log is acted on.
    async fn fetch_logs(
        &self,
        range: BlockRange,
        factory_addresses: &HashSet<EthAddress>,
    ) -> ChainSyncResult<Vec<ethers::types::Log>> {
        let mut addresses: Vec<EthAddress> = factory_addresses.iter().copied().collect();
        addresses.sort();
        let mut logs = Vec::new();
        for chunk in range.chunks(self.options.max_block_range) {
            let chunk_logs = retry_with_policy!(
                self.chain.get_logs(chunk, &addresses),
                self.options.retry
            )?;
            tracing::debug!(
                "[SyncLoop] Fetched {} logs for blocks {}",
                chunk_logs.len(),
                chunk
            );
            logs.extend(chunk_logs);
        }
        Ok(logs)
    }

    async fn inspect_and_dispatch(
        &self,
        escrow: EthAddress,
        factory: EthAddress,
        tx_hash: EthTransactionHash,
    ) -> DispatchOutcome {
        let info = match self.inspector.inspect(escrow).await {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(
                    "[SyncLoop] Failed to inspect escrow={:?}, tx_hash={:?}, will retry next pass: {:?}",
                    escrow,
                    tx_hash,
                    e
                );
                self.record_error(&e);
                return DispatchOutcome::InspectionFailed;
            }
        };
        let Some(job) = info.job_for(escrow, factory, Utc::now()) else {
            if info.may_become_dispatchable() {
                tracing::debug!(
                    "[SyncLoop] Escrow {:?} not dispatchable yet: status={:?}, manifest_url={:?}",
                    escrow,
                    info.status(),
                    info.manifest_url
                );
                return DispatchOutcome::NotYetDispatchable;
            }
            tracing::info!(
                "[SyncLoop] Escrow {:?} will not become a job: status={:?}, raw_status={}",
                escrow,
                info.status(),
                info.raw_status
            );
            return DispatchOutcome::Retired;
        };
        match self.sink.submit(job).await {
            Ok(()) => {
                tracing::info!(
                    "[SyncLoop] Dispatched job for escrow={:?}, factory={:?}",
                    escrow,
                    factory
                );
                DispatchOutcome::Dispatched
            }
            Err(e) => {
                tracing::error!(
                    "[SyncLoop] Job sink rejected escrow={:?}, will retry next pass: {:?}",
                    escrow,
                    e
                );
                self.record_error(&e);
                DispatchOutcome::DispatchFailed
            }
        }
    }

    fn record_error(&self, error: &ChainSyncError) {
        if let Some(metrics) = &self.metrics {
            metrics
                .errors
                .with_label_values(&[error.error_type()])
                .inc();
        }
    }
}
