// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Downstream intake for qualifying escrows.

use crate::error::{ChainSyncError, ChainSyncResult};
use crate::types::EscrowJob;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit(&self, job: EscrowJob) -> ChainSyncResult<()>;
}

/// Forwards jobs to an in-process consumer. Never waits for capacity: a full
/// channel rejects the job, which stays queued in the sync loop and is
/// submitted again on the next pass.
#[derive(Debug, Clone)]
pub struct ChannelJobSink {
    tx: mpsc::Sender<EscrowJob>,
}

impl ChannelJobSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EscrowJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobSink for ChannelJobSink {
    async fn submit(&self, job: EscrowJob) -> ChainSyncResult<()> {
        let escrow = job.escrow_address;
        self.tx.try_send(job).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "job channel is full".to_string(),
                TrySendError::Closed(_) => "job channel is closed".to_string(),
            };
            ChainSyncError::Dispatch { escrow, reason }
        })
    }
}

/// Writes every job to the log as JSON.
#[derive(Debug, Clone, Default)]
pub struct LogJobSink;

#[async_trait]
impl JobSink for LogJobSink {
    async fn submit(&self, job: EscrowJob) -> ChainSyncResult<()> {
        let payload = serde_json::to_string(&job).map_err(|e| ChainSyncError::Dispatch {
            escrow: job.escrow_address,
            reason: e.to_string(),
        })?;
        tracing::info!("[LogJobSink] New escrow job: {}", payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EthAddress;
    use chrono::Utc;

    fn job() -> EscrowJob {
        EscrowJob {
            escrow_address: EthAddress::repeat_byte(0xe1),
            manifest_url: "https://x/y".to_string(),
            launched_at: Utc::now(),
            factory_address: EthAddress::repeat_byte(0xf1),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_jobs() {
        let (sink, mut rx) = ChannelJobSink::new(4);
        let job = job();
        sink.submit(job.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelJobSink::new(1);
        drop(rx);
        let err = sink.submit(job()).await.unwrap_err();
        assert_eq!(err.error_type(), "dispatch");
    }

    #[tokio::test]
    async fn test_channel_sink_rejects_instead_of_waiting_when_full() {
        let (sink, mut rx) = ChannelJobSink::new(1);
        sink.submit(job()).await.unwrap();
        let err = sink.submit(job()).await.unwrap_err();
        assert!(err.to_string().contains("full"), "{}", err);

        rx.recv().await.unwrap();
        sink.submit(job()).await.unwrap();
    }

    #[tokio::test]
    async fn test_log_sink_accepts_jobs() {
        LogJobSink.submit(job()).await.unwrap();
    }
}
