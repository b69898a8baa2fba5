// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Process-lifetime record of escrows already accepted.
//!
//! An escrow is recorded at most once, and only when it was funded with an
//! allow-listed token and its own `launcher()` is an allow-listed factory.
//! The emitting log's address is never trusted for the latter: anyone can
//! deploy a contract that emits a `Launched` event.

use crate::chain::EscrowReader;
use crate::error::ChainSyncResult;
use crate::types::{EthAddress, LaunchedEvent};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        escrow: EthAddress,
        factory: EthAddress,
    },
    TokenNotAllowed,
    AlreadyRecorded,
    LauncherNotAllowed {
        launcher: EthAddress,
    },
}

impl RecordOutcome {
    /// `(escrow, factory)` when the event produced a new record.
    pub fn recorded(&self) -> Option<(EthAddress, EthAddress)> {
        match self {
            RecordOutcome::Recorded { escrow, factory } => Some((*escrow, *factory)),
            _ => None,
        }
    }

    /// Label used for rejection metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RecordOutcome::Recorded { .. } => "recorded",
            RecordOutcome::TokenNotAllowed => "token_not_allowed",
            RecordOutcome::AlreadyRecorded => "already_recorded",
            RecordOutcome::LauncherNotAllowed { .. } => "launcher_not_allowed",
        }
    }
}

#[derive(Debug, Default)]
pub struct LaunchTracker {
    // escrow -> factory that launched it
    launched: HashMap<EthAddress, EthAddress>,
}

impl LaunchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event.escrow_address` if it is new and passes both allow-lists.
    /// A failed launcher lookup leaves the tracker untouched so a later pass
    /// can try again.
    pub async fn record_if_new<R: EscrowReader + ?Sized>(
        &mut self,
        event: &LaunchedEvent,
        allowed_factories: &HashSet<EthAddress>,
        allowed_tokens: &HashSet<EthAddress>,
        reader: &R,
    ) -> ChainSyncResult<RecordOutcome> {
        if !allowed_tokens.contains(&event.token_address) {
            return Ok(RecordOutcome::TokenNotAllowed);
        }
        if self.launched.contains_key(&event.escrow_address) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        let launcher = reader.launcher(event.escrow_address).await?;
        if !allowed_factories.contains(&launcher) {
            return Ok(RecordOutcome::LauncherNotAllowed { launcher });
        }
        self.launched.insert(event.escrow_address, launcher);
        Ok(RecordOutcome::Recorded {
            escrow: event.escrow_address,
            factory: launcher,
        })
    }

    pub fn contains(&self, escrow: &EthAddress) -> bool {
        self.launched.contains_key(escrow)
    }

    pub fn factory_of(&self, escrow: &EthAddress) -> Option<EthAddress> {
        self.launched.get(escrow).copied()
    }

    pub fn len(&self) -> usize {
        self.launched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launched.is_empty()
    }

    pub fn entries(&self) -> Vec<(EthAddress, EthAddress)> {
        self.launched.iter().map(|(e, f)| (*e, *f)).collect()
    }
}
