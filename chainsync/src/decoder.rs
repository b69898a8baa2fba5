// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::launched_event;
use crate::error::{ChainSyncResult, DecodeError, DecodeErrorKind};
use crate::types::LaunchedEvent;
use ethers::abi::{Event, RawLog};
use ethers::types::{Log, H256};

/// Turns raw factory logs into `LaunchedEvent`s.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    event: &'static Event,
    signature: H256,
}

/// Outcome of decoding one batch of logs.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub events: Vec<LaunchedEvent>,
    pub failures: Vec<DecodeError>,
}

impl EventDecoder {
    pub fn new() -> ChainSyncResult<Self> {
        let event = launched_event()?;
        Ok(Self {
            event,
            signature: event.signature(),
        })
    }

    /// topic0 of every Launched log.
    pub fn signature(&self) -> H256 {
        self.signature
    }

    pub fn decode(&self, log: &Log) -> Result<LaunchedEvent, DecodeError> {
        let error = |kind| DecodeError {
            emitter: log.address,
            tx_hash: log.transaction_hash,
            block_number: log.block_number.map(|b| b.as_u64()),
            log_index: log.log_index.map(|i| i.low_u64()),
            kind,
        };

        let topic0 = log.topics.first().copied();
        if topic0 != Some(self.signature) {
            return Err(error(DecodeErrorKind::SignatureMismatch(topic0)));
        }
        let parsed = self
            .event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .map_err(|e| error(DecodeErrorKind::MalformedData(e.to_string())))?;

        let address_param = |name: &str| {
            parsed
                .params
                .iter()
                .find(|p| p.name == name)
                .and_then(|p| p.value.clone().into_address())
                .ok_or_else(|| {
                    error(DecodeErrorKind::MalformedData(format!(
                        "missing address parameter {name}"
                    )))
                })
        };
        let token_address = address_param("eip20")?;
        let escrow_address = address_param("escrow")?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_else(|| error(DecodeErrorKind::MissingTransactionHash))?;

        Ok(LaunchedEvent {
            escrow_address,
            token_address,
            transaction_hash,
            factory_address: log.address,
            block_number: log.block_number.map(|b| b.as_u64()),
            log_index: log.log_index.map(|i| i.low_u64()),
        })
    }

    /// Decodes every log independently. A bad log never stops the batch.
    pub fn decode_batch(&self, logs: &[Log]) -> DecodedBatch {
        let mut batch = DecodedBatch::default();
        for log in logs {
            match self.decode(log) {
                Ok(event) => batch.events.push(event),
                Err(e) => {
                    tracing::warn!("[EventDecoder] Skipping undecodable log: {}", e);
                    batch.failures.push(e);
                }
            }
        }
        batch
    }
}
