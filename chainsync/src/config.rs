// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ChainSyncError, ChainSyncResult};
use crate::types::EthAddress;
use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// File-backed configuration. The file extension picks the format:
/// `.yaml`/`.yml` is YAML, anything else is JSON.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse JSON config {}", path.display()))?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainSyncConfig {
    // Rpc url for the Eth fullnode.
    pub eth_rpc_url: String,
    // When set, connecting to a node on another chain is a startup error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    // `from` of every contract read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_payer: Option<EthAddress>,
    // Gas limit of every contract read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    // Factories whose Launched events are watched, and which must be the
    // escrow's own launcher.
    #[serde(default)]
    pub factory_addresses: Vec<EthAddress>,
    // Tokens an escrow must be funded with.
    #[serde(default)]
    pub token_addresses: Vec<EthAddress>,
    #[serde(default)]
    pub start_block: u64,
    // None means the latest block at the start of each pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_block: Option<u64>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Config for ChainSyncConfig {}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_block_range() -> u64 {
    10_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_reads() -> usize {
    8
}

/// Exponential backoff for individual chain reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
    // Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_secs: default_max_interval_secs(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
            max_elapsed_secs: default_max_elapsed_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    400
}

fn default_max_interval_secs() -> u64 {
    120
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_randomization_factor() -> f64 {
    0.1
}

fn default_max_elapsed_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    5
}

impl RetryConfig {
    // The following delay sequence (in secs) is used with the defaults, applied with jitter:
    // 0.4, 0.8, 1.6, 3.2, 6.4 and then the attempt budget runs out
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            randomization_factor: self.randomization_factor,
            multiplier: self.multiplier,
            max_interval: Duration::from_secs(self.max_interval_secs),
            max_elapsed_time: Some(Duration::from_secs(self.max_elapsed_secs)),
            ..Default::default()
        }
    }

    /// Millisecond delays so tests don't sleep for real.
    pub fn for_testing() -> Self {
        Self {
            initial_interval_ms: 1,
            max_interval_secs: 1,
            multiplier: 1.5,
            randomization_factor: 0.0,
            max_elapsed_secs: 10,
            max_retries: 2,
        }
    }
}

/// Backoff between failed passes and the point at which the process gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            backoff_initial_secs: default_backoff_initial_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_backoff_initial_secs() -> u64 {
    15
}

fn default_backoff_max_secs() -> u64 {
    300
}

/// Values taken from the command line or environment, applied over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub eth_rpc_url: Option<String>,
    pub gas_payer: Option<EthAddress>,
    pub gas: Option<u64>,
    pub factory_addresses: Option<Vec<EthAddress>>,
    pub token_addresses: Option<Vec<EthAddress>>,
    pub metrics_port: Option<u16>,
}

impl ChainSyncConfig {
    /// A config with every optional field at its default.
    pub fn new(
        eth_rpc_url: impl Into<String>,
        factory_addresses: Vec<EthAddress>,
        token_addresses: Vec<EthAddress>,
    ) -> Self {
        Self {
            eth_rpc_url: eth_rpc_url.into(),
            expected_chain_id: None,
            gas_payer: None,
            gas: None,
            factory_addresses,
            token_addresses,
            start_block: 0,
            end_block: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_block_range: default_max_block_range(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_reads: default_max_concurrent_reads(),
            metrics_port: None,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.eth_rpc_url {
            self.eth_rpc_url = url;
        }
        if let Some(gas_payer) = overrides.gas_payer {
            self.gas_payer = Some(gas_payer);
        }
        if let Some(gas) = overrides.gas {
            self.gas = Some(gas);
        }
        if let Some(factories) = overrides.factory_addresses {
            self.factory_addresses = factories;
        }
        if let Some(tokens) = overrides.token_addresses {
            self.token_addresses = tokens;
        }
        if let Some(port) = overrides.metrics_port {
            self.metrics_port = Some(port);
        }
    }

    pub fn validate(&self) -> ChainSyncResult<()> {
        if self.eth_rpc_url.trim().is_empty() {
            return Err(ChainSyncError::Config("eth-rpc-url is empty".into()));
        }
        Url::parse(&self.eth_rpc_url).map_err(|e| {
            ChainSyncError::Config(format!("eth-rpc-url {} is invalid: {e}", self.eth_rpc_url))
        })?;
        if self.factory_addresses.is_empty() {
            return Err(ChainSyncError::Config(
                "factory-addresses must not be empty".into(),
            ));
        }
        if self.token_addresses.is_empty() {
            return Err(ChainSyncError::Config(
                "token-addresses must not be empty".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ChainSyncError::Config(
                "poll-interval-secs must be positive".into(),
            ));
        }
        if self.max_block_range == 0 {
            return Err(ChainSyncError::Config(
                "max-block-range must be positive".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ChainSyncError::Config(
                "request-timeout-secs must be positive".into(),
            ));
        }
        if self.max_concurrent_reads == 0 {
            return Err(ChainSyncError::Config(
                "max-concurrent-reads must be positive".into(),
            ));
        }
        if let Some(end_block) = self.end_block {
            if end_block < self.start_block {
                return Err(ChainSyncError::Config(format!(
                    "end-block {} is before start-block {}",
                    end_block, self.start_block
                )));
            }
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ChainSyncError::Config(
                "circuit-breaker.failure-threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn factory_set(&self) -> HashSet<EthAddress> {
        self.factory_addresses.iter().copied().collect()
    }

    pub fn token_set(&self) -> HashSet<EthAddress> {
        self.token_addresses.iter().copied().collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> ChainSyncConfig {
        ChainSyncConfig::new(
            "http://localhost:8545",
            vec![EthAddress::repeat_byte(1)],
            vec![EthAddress::repeat_byte(2)],
        )
    }

    #[test]
    fn test_load_yaml_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
eth-rpc-url: "http://localhost:8545"
factory-addresses: ["0x0101010101010101010101010101010101010101"]
token-addresses: ["0x0202020202020202020202020202020202020202"]
gas: 6700000
retry:
  max-retries: 3
"#
        )
        .unwrap();

        let config = ChainSyncConfig::load(file.path()).unwrap();
        assert_eq!(config.eth_rpc_url, "http://localhost:8545");
        assert_eq!(config.factory_addresses, vec![EthAddress::repeat_byte(1)]);
        assert_eq!(config.token_addresses, vec![EthAddress::repeat_byte(2)]);
        assert_eq!(config.gas, Some(6_700_000));
        assert_eq!(config.start_block, 0);
        assert_eq!(config.end_block, None);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.max_block_range, 10_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_concurrent_reads, 8);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_interval_ms, 400);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chainsync.json");
        let mut config = valid_config();
        config.expected_chain_id = Some(1);
        config.end_block = Some(100);
        config.save(&path).unwrap();

        let loaded = ChainSyncConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChainSyncConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = valid_config();
        let gas_payer = EthAddress::repeat_byte(9);
        config.apply_overrides(ConfigOverrides {
            eth_rpc_url: Some("http://node:8545".to_string()),
            gas_payer: Some(gas_payer),
            gas: Some(100_000),
            factory_addresses: None,
            token_addresses: Some(vec![EthAddress::repeat_byte(3)]),
            metrics_port: Some(9184),
        });
        assert_eq!(config.eth_rpc_url, "http://node:8545");
        assert_eq!(config.gas_payer, Some(gas_payer));
        assert_eq!(config.gas, Some(100_000));
        assert_eq!(config.factory_addresses, vec![EthAddress::repeat_byte(1)]);
        assert_eq!(config.token_addresses, vec![EthAddress::repeat_byte(3)]);
        assert_eq!(config.metrics_port, Some(9184));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut ChainSyncConfig)>)> = vec![
            ("eth-rpc-url", Box::new(|c: &mut ChainSyncConfig| c.eth_rpc_url = " ".into())),
            ("eth-rpc-url", Box::new(|c: &mut ChainSyncConfig| c.eth_rpc_url = "not a url".into())),
            ("factory-addresses", Box::new(|c: &mut ChainSyncConfig| c.factory_addresses.clear())),
            ("token-addresses", Box::new(|c: &mut ChainSyncConfig| c.token_addresses.clear())),
            ("poll-interval-secs", Box::new(|c: &mut ChainSyncConfig| c.poll_interval_secs = 0)),
            ("max-block-range", Box::new(|c: &mut ChainSyncConfig| c.max_block_range = 0)),
            ("request-timeout-secs", Box::new(|c: &mut ChainSyncConfig| c.request_timeout_secs = 0)),
            ("max-concurrent-reads", Box::new(|c: &mut ChainSyncConfig| c.max_concurrent_reads = 0)),
            (
                "end-block",
                Box::new(|c: &mut ChainSyncConfig| {
                    c.start_block = 10;
                    c.end_block = Some(9);
                }),
            ),
            (
                "failure-threshold",
                Box::new(|c: &mut ChainSyncConfig| c.circuit_breaker.failure_threshold = 0),
            ),
        ];
        for (field, mutate) in cases {
            let mut config = valid_config();
            mutate(&mut config);
            match config.validate() {
                Err(ChainSyncError::Config(msg)) => {
                    assert!(msg.contains(field), "{} not in {}", field, msg)
                }
                other => panic!("expected config error for {}, got {:?}", field, other),
            }
        }
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_retry_backoff_uses_policy() {
        let backoff = RetryConfig::default().backoff();
        assert_eq!(backoff.initial_interval, Duration::from_millis(400));
        assert_eq!(backoff.max_interval, Duration::from_secs(120));
        assert_eq!(backoff.max_elapsed_time, Some(Duration::from_secs(600)));
        assert_eq!(backoff.multiplier, 2.0);
    }
}
