// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{ContractRegistry, Escrow};
use crate::chain::{ChainClient, EscrowReader};
use crate::config::ChainSyncConfig;
use crate::error::{ChainSyncError, ChainSyncResult};
use crate::metered_eth_provider::{
    new_metered_eth_provider, MeteredEthHttpProvider, DEFAULT_MAX_CONCURRENT_REQUESTS,
};
use crate::metrics::ChainSyncMetrics;
use crate::types::{BlockRange, EthAddress};
use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::builders::ContractCall;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{Filter, Log};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

#[derive(Debug, Clone)]
pub struct EthClientOptions {
    pub expected_chain_id: Option<u64>,
    pub gas_payer: Option<EthAddress>,
    pub gas: Option<u64>,
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
}

impl EthClientOptions {
    pub fn from_config(config: &ChainSyncConfig) -> Self {
        Self {
            expected_chain_id: config.expected_chain_id,
            gas_payer: config.gas_payer,
            gas: config.gas,
            request_timeout: config.request_timeout(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS
                .max(config.max_concurrent_reads * 2),
        }
    }
}

impl Default for EthClientOptions {
    fn default() -> Self {
        Self {
            expected_chain_id: None,
            gas_payer: None,
            gas: None,
            request_timeout: Duration::from_secs(30),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

pub struct EthClient<P> {
    provider: Arc<Provider<P>>,
    contracts: ContractRegistry<Provider<P>>,
    options: EthClientOptions,
}

impl EthClient<MeteredEthHttpProvider> {
    pub async fn new(
        provider_url: &str,
        metrics: Arc<ChainSyncMetrics>,
        options: EthClientOptions,
    ) -> anyhow::Result<Self> {
        let provider =
            new_metered_eth_provider(provider_url, metrics, options.max_concurrent_requests)?;
        let self_ = Self::with_provider(provider, options);
        self_.describe().await?;
        Ok(self_)
    }
}

impl<P> EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn with_provider(provider: Provider<P>, options: EthClientOptions) -> Self {
        let provider = Arc::new(provider);
        Self {
            contracts: ContractRegistry::new(provider.clone()),
            provider,
            options,
        }
    }

    pub fn contracts(&self) -> &ContractRegistry<Provider<P>> {
        &self.contracts
    }

    pub async fn get_chain_id(&self) -> ChainSyncResult<u64> {
        let chain_id = self
            .with_timeout(async { Ok::<_, ChainSyncError>(self.provider.get_chainid().await?) })
            .await?;
        Ok(chain_id.as_u64())
    }

    // Validate chain identifier and log connection info
    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.get_chain_id().await?;

        if let Some(expected) = self.options.expected_chain_id {
            if chain_id != expected {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch: expected {}, got {}. This could indicate connecting to the wrong network!",
                    expected,
                    chain_id
                ));
            }
        }
        let block_number = self.latest_block_number().await?;
        if self.options.expected_chain_id.is_some() {
            tracing::info!(
                "EthClient connected to chain {} (verified), current block: {}",
                chain_id,
                block_number
            );
        } else {
            tracing::warn!(
                "EthClient connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}",
                chain_id,
                block_number
            );
        }
        Ok(())
    }

    async fn with_timeout<T, F>(&self, fut: F) -> ChainSyncResult<T>
    where
        F: Future<Output = ChainSyncResult<T>>,
    {
        let timeout = self.options.request_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ChainSyncError::Timeout(timeout))?
    }

    // Contract reads are issued from the gas payer with the configured gas limit
    fn with_call_options<D: Detokenize>(
        &self,
        mut call: ContractCall<Provider<P>, D>,
    ) -> ContractCall<Provider<P>, D> {
        if let Some(from) = self.options.gas_payer {
            call = call.from(from);
        }
        if let Some(gas) = self.options.gas {
            call = call.gas(gas);
        }
        call
    }

    fn escrow(&self, address: EthAddress) -> Escrow<Provider<P>> {
        self.contracts.escrow(address)
    }
}

#[async_trait]
impl<P> ChainClient for EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    // Note: query may fail if range is too big. Callsite is responsible
    // for chunking the query.
    async fn get_logs(
        &self,
        range: BlockRange,
        addresses: &[EthAddress],
    ) -> ChainSyncResult<Vec<Log>> {
        let filter = Filter::new()
            .from_block(range.from)
            .to_block(range.to)
            .address(addresses.to_vec());
        let logs = self
            .with_timeout(async { Ok::<_, ChainSyncError>(self.provider.get_logs(&filter).await?) })
            .await
            .tap_err(|e| {
                tracing::error!(
                    "get_logs failed. Filter: {:?}. Error {:?}",
                    filter,
                    e
                )
            })?;

        // Safeguard check that all events are emitted from requested contract addresses
        if let Some(log) = logs.iter().find(|log| !addresses.contains(&log.address)) {
            return Err(ChainSyncError::ChainRead(format!(
                "Provider returns logs from different contract address (expected: {:?}): {:?}",
                addresses, log
            )));
        }
        Ok(logs
            .into_iter()
            .filter(|log| log.removed != Some(true))
            .collect())
    }

    async fn latest_block_number(&self) -> ChainSyncResult<u64> {
        let block = self
            .with_timeout(async { Ok::<_, ChainSyncError>(self.provider.get_block_number().await?) })
            .await?;
        Ok(block.as_u64())
    }
}

#[async_trait]
impl<P> EscrowReader for EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn launcher(&self, escrow: EthAddress) -> ChainSyncResult<EthAddress> {
        let call = self.with_call_options(self.escrow(escrow).launcher());
        self.with_timeout(async { Ok::<_, ChainSyncError>(call.call().await?) }).await
    }

    async fn manifest_url(&self, escrow: EthAddress) -> ChainSyncResult<String> {
        let call = self.with_call_options(self.escrow(escrow).manifest_url());
        self.with_timeout(async { Ok::<_, ChainSyncError>(call.call().await?) }).await
    }

    async fn status(&self, escrow: EthAddress) -> ChainSyncResult<u8> {
        let call = self.with_call_options(self.escrow(escrow).status());
        self.with_timeout(async { Ok::<_, ChainSyncError>(call.call().await?) }).await
    }
}
