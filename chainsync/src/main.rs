// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use escrow_chainsync::config::{ChainSyncConfig, Config, ConfigOverrides};
use escrow_chainsync::metrics::start_metrics_server;
use escrow_chainsync::node::run_chainsync_node;
use escrow_chainsync::types::EthAddress;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// YAML or JSON config file. Flags below override its values.
    #[clap(long)]
    pub config_path: Option<PathBuf>,
    #[clap(long, env = "ETH_SERVER")]
    pub eth_rpc_url: Option<String>,
    #[clap(long, env = "ETH_GAS_PAYER")]
    pub gas_payer: Option<EthAddress>,
    #[clap(long, env = "ETH_GAS")]
    pub gas: Option<u64>,
    #[clap(long, value_delimiter = ',')]
    pub factory_addresses: Option<Vec<EthAddress>>,
    #[clap(long, value_delimiter = ',')]
    pub token_addresses: Option<Vec<EthAddress>>,
    #[clap(long)]
    pub metrics_port: Option<u16>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            eth_rpc_url: self.eth_rpc_url.clone(),
            gas_payer: self.gas_payer,
            gas: self.gas,
            factory_addresses: self.factory_addresses.clone(),
            token_addresses: self.token_addresses.clone(),
            metrics_port: self.metrics_port,
        }
    }
}

fn init_logging() {
    // RUST_LOG wins, LOGLEVEL is honoured for older deployments
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("LOGLEVEL"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let mut config = match &args.config_path {
        Some(path) => ChainSyncConfig::load(path)?,
        None => ChainSyncConfig::new(
            args.eth_rpc_url.clone().unwrap_or_default(),
            vec![],
            vec![],
        ),
    };
    config.apply_overrides(args.overrides());
    config.validate()?;

    let prometheus_registry = prometheus::Registry::new();
    if let Some(port) = config.metrics_port {
        let metrics_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
        start_metrics_server(metrics_address, prometheus_registry.clone()).await?;
        info!("Metrics server started at port {}", port);
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                shutdown.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {:?}", e),
        }
    });

    if let Err(e) = run_chainsync_node(config, &prometheus_registry, cancel).await {
        error!("Escrow chainsync failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}
