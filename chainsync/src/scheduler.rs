// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Drives `SyncLoop` passes until cancelled or until too many passes fail in a row.

use crate::chain::{ChainClient, EscrowReader};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::{ChainSyncConfig, CircuitBreakerConfig, RetryConfig};
use crate::error::{ChainSyncError, ChainSyncResult};
use crate::job_sink::JobSink;
use crate::metrics::ChainSyncMetrics;
use crate::retry_with_policy;
use crate::sync_loop::{SyncLoop, SyncOptions};
use crate::types::{BlockRange, EthAddress, PassSummary};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub start_block: u64,
    // None follows the chain head
    pub end_block: Option<u64>,
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl SchedulerOptions {
    pub fn from_config(config: &ChainSyncConfig) -> Self {
        Self {
            start_block: config.start_block,
            end_block: config.end_block,
            poll_interval: config.poll_interval(),
            retry: config.retry.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
        }
    }
}

pub struct SyncScheduler {
    sync_loop: SyncLoop,
    chain: Arc<dyn ChainClient>,
    factory_addresses: HashSet<EthAddress>,
    token_addresses: HashSet<EthAddress>,
    options: SchedulerOptions,
    breaker: CircuitBreaker,
    metrics: Option<Arc<ChainSyncMetrics>>,
}

impl SyncScheduler {
    pub fn new(
        sync_loop: SyncLoop,
        chain: Arc<dyn ChainClient>,
        factory_addresses: HashSet<EthAddress>,
        token_addresses: HashSet<EthAddress>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            sync_loop,
            chain,
            factory_addresses,
            token_addresses,
            breaker: CircuitBreaker::new(options.circuit_breaker.clone()),
            options,
            metrics: None,
        }
    }

    /// Wires a scheduler and its sync loop from a validated config.
    pub fn from_config(
        config: &ChainSyncConfig,
        chain: Arc<dyn ChainClient>,
        reader: Arc<dyn EscrowReader>,
        sink: Arc<dyn JobSink>,
        metrics: Option<Arc<ChainSyncMetrics>>,
    ) -> ChainSyncResult<Self> {
        config.validate()?;
        let mut sync_loop =
            SyncLoop::new(chain.clone(), reader, sink, SyncOptions::from_config(config))?;
        if let Some(metrics) = &metrics {
            sync_loop = sync_loop.with_metrics(metrics.clone());
        }
        let mut scheduler = Self::new(
            sync_loop,
            chain,
            config.factory_set(),
            config.token_set(),
            SchedulerOptions::from_config(config),
        );
        scheduler.metrics = metrics;
        Ok(scheduler)
    }

    pub fn with_metrics(mut self, metrics: Arc<ChainSyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn sync_loop(&self) -> &SyncLoop {
        &self.sync_loop
    }

    // Every pass rescans from `start_block`; the tracker makes that idempotent.
    async fn resolve_range(&self) -> ChainSyncResult<Option<BlockRange>> {
        let end = match self.options.end_block {
            Some(end) => end,
            None => retry_with_policy!(self.chain.latest_block_number(), self.options.retry)?,
        };
        if end < self.options.start_block {
            return Ok(None);
        }
        BlockRange::new(self.options.start_block, end).map(Some)
    }

    /// One pass, or `None` when the chain has not reached `start_block` yet.
    pub async fn run_once(&mut self) -> ChainSyncResult<Option<PassSummary>> {
        let Some(range) = self.resolve_range().await? else {
            debug!(
                "[SyncScheduler] Chain head is below start block {}, skipping pass",
                self.options.start_block
            );
            return Ok(None);
        };
        self.sync_loop
            .run(range, &self.factory_addresses, &self.token_addresses)
            .await
            .map(Some)
    }

    /// Runs passes until `cancel` fires. A pass in flight always completes.
    pub async fn run(mut self, cancel: CancellationToken) -> ChainSyncResult<()> {
        info!(
            "[SyncScheduler] Synchronisation started: factories={:?}, tokens={:?}, start_block={}",
            self.factory_addresses, self.token_addresses, self.options.start_block
        );
        loop {
            if cancel.is_cancelled() {
                info!("[SyncScheduler] Cancelled, stopping");
                return Ok(());
            }

            let wait = match self.run_once().await {
                Ok(summary) => {
                    self.breaker.record_success();
                    self.on_pass_success(summary.as_ref());
                    self.options.poll_interval
                }
                Err(e) => {
                    let state = self.breaker.record_failure();
                    self.on_pass_failure(&e);
                    if state == CircuitState::Open {
                        error!(
                            "[SyncScheduler] Giving up after {} consecutive failed passes, last error: {:?}",
                            self.breaker.consecutive_failures(),
                            e
                        );
                        return Err(ChainSyncError::CircuitOpen {
                            consecutive_failures: self.breaker.consecutive_failures(),
                        });
                    }
                    let backoff = self.breaker.next_backoff();
                    warn!(
                        "[SyncScheduler] Pass failed ({} in a row), retrying in {:?}: {:?}",
                        self.breaker.consecutive_failures(),
                        backoff,
                        e
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[SyncScheduler] Cancelled, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn on_pass_success(&self, summary: Option<&PassSummary>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.consecutive_pass_failures.set(0);
        match summary {
            Some(summary) => {
                metrics.sync_passes.with_label_values(&["success"]).inc();
                if let Some(range) = summary.range {
                    metrics.last_synced_block.set(range.to as i64);
                }
            }
            None => metrics.sync_passes.with_label_values(&["skipped"]).inc(),
        }
    }

    fn on_pass_failure(&self, error: &ChainSyncError) {
        if let Some(metrics) = &self.metrics {
            metrics.sync_passes.with_label_values(&["failure"]).inc();
            metrics
                .consecutive_pass_failures
                .set(self.breaker.consecutive_failures() as i64);
            metrics
                .errors
                .with_label_values(&[error.error_type()])
                .inc();
        }
    }
}
