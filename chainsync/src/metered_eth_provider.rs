// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::ChainSyncMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::{ParseError, Url};

/// Upper bound on in-flight JSON-RPC requests to one node.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 16;

#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    metrics: Arc<ChainSyncMetrics>,
    semaphore: Arc<Semaphore>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is owned here and never closed
        let _permit = self.semaphore.acquire().await.ok();

        self.metrics
            .eth_rpc_queries
            .with_label_values(&[method])
            .inc();
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();

        let result = self.inner.request(method, params).await;
        match &result {
            Ok(_) => self.metrics.eth_node_connected.set(1),
            Err(e) => {
                self.metrics.eth_node_connected.set(0);
                tracing::debug!("eth rpc {} failed: {:?}", method, e);
            }
        }
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(url: impl Into<Url>, metrics: Arc<ChainSyncMetrics>, max_concurrent: usize) -> Self {
        Self {
            inner: Http::new(url),
            metrics,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    metrics: Arc<ChainSyncMetrics>,
    max_concurrent: usize,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, metrics, max_concurrent);
    Ok(Provider::new(http_provider))
}
