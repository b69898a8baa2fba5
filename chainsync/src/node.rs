// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::{ChainClient, EscrowReader};
use crate::config::ChainSyncConfig;
use crate::eth_client::{EthClient, EthClientOptions};
use crate::job_sink::{JobSink, LogJobSink};
use crate::metrics::ChainSyncMetrics;
use crate::scheduler::SyncScheduler;
use prometheus::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Connects to the Eth node named in `config` and synchronises until
/// `cancel` fires. Jobs are written to the log.
pub async fn run_chainsync_node(
    config: ChainSyncConfig,
    prometheus_registry: &Registry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;
    let metrics = Arc::new(ChainSyncMetrics::new(prometheus_registry));

    let eth_client = Arc::new(
        EthClient::new(
            &config.eth_rpc_url,
            metrics.clone(),
            EthClientOptions::from_config(&config),
        )
        .await?,
    );

    run_with_clients(
        config,
        eth_client.clone(),
        eth_client,
        Arc::new(LogJobSink),
        metrics,
        cancel,
    )
    .await
}

pub async fn run_with_clients(
    config: ChainSyncConfig,
    chain: Arc<dyn ChainClient>,
    reader: Arc<dyn EscrowReader>,
    sink: Arc<dyn JobSink>,
    metrics: Arc<ChainSyncMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let scheduler = SyncScheduler::from_config(&config, chain, reader, sink, Some(metrics))?;
    scheduler
        .run(cancel)
        .await
        .map_err(|e| anyhow::anyhow!("Chain synchronisation stopped: {}", e))
}
