// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod abi;
pub mod chain;
pub mod circuit_breaker;
pub mod config;
pub mod decoder;
pub mod error;
pub mod eth_client;
pub mod inspector;
pub mod job_sink;
pub mod launch_tracker;
pub mod metered_eth_provider;
pub mod metrics;
pub mod node;
pub mod scheduler;
pub mod sync_loop;
pub mod types;

#[cfg(test)]
pub mod test_utils;

/// Retries `$func` with the exponential backoff described by `$policy`
/// (a `RetryConfig`). Only transient `ChainSyncError`s are retried, at most
/// `max_retries` times after the first attempt; anything else is returned
/// right away.
#[macro_export]
macro_rules! retry_with_policy {
    ($func:expr, $policy:expr) => {{
        let policy: &$crate::config::RetryConfig = &$policy;
        let max_retries = policy.max_retries;
        let attempts = std::sync::atomic::AtomicU32::new(0);
        backoff::future::retry(policy.backoff(), || {
            let fut = async {
                let attempt = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let result: Result<_, $crate::error::ChainSyncError> = $func.await;
                match result {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_transient() && attempt < max_retries => {
                        tracing::debug!(
                            "Retrying due to transient error (attempt {}/{}): {:?}",
                            attempt + 1,
                            max_retries,
                            e
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
