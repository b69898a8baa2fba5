// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ChainSyncError, ChainSyncResult};
use crate::types::EthAddress;
use ethers::abi::{Abi, Event};
use ethers::contract::abigen;
use ethers::providers::Middleware;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::Display;

pub const LAUNCHED_EVENT_NAME: &str = "Launched";

abigen!(
    Escrow,
    r#"[
        function launcher() external view returns (address)
        function manifestUrl() external view returns (string)
        function status() external view returns (uint8)
    ]"#,
);

abigen!(
    EscrowFactory,
    r#"[
        event Launched(address eip20, address escrow)
    ]"#,
);

abigen!(
    HMToken,
    r#"[
        function balanceOf(address _owner) external view returns (uint256)
    ]"#,
);

/// Contract kinds the synchronizer knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContractKind {
    Escrow,
    EscrowFactory,
    HMToken,
}

impl ContractKind {
    pub fn abi(&self) -> &'static Abi {
        match self {
            ContractKind::Escrow => &*ESCROW_ABI,
            ContractKind::EscrowFactory => &*ESCROWFACTORY_ABI,
            ContractKind::HMToken => &*HMTOKEN_ABI,
        }
    }
}

impl FromStr for ContractKind {
    type Err = ChainSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Escrow" => Ok(ContractKind::Escrow),
            "EscrowFactory" => Ok(ContractKind::EscrowFactory),
            "HMToken" => Ok(ContractKind::HMToken),
            _ => Err(ChainSyncError::Config(format!("unknown contract kind: {s}"))),
        }
    }
}

/// The `Launched(address eip20, address escrow)` event definition.
pub fn launched_event() -> ChainSyncResult<&'static Event> {
    ContractKind::EscrowFactory
        .abi()
        .event(LAUNCHED_EVENT_NAME)
        .map_err(|e| ChainSyncError::Config(format!("EscrowFactory ABI has no Launched event: {e}")))
}

/// Resolves contract kinds to their ABI and to typed handles bound to an address.
#[derive(Debug)]
pub struct ContractRegistry<M> {
    client: Arc<M>,
}

impl<M> Clone for ContractRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<M: Middleware> ContractRegistry<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    pub fn abi(&self, kind: ContractKind) -> &'static Abi {
        kind.abi()
    }

    pub fn abi_by_name(&self, name: &str) -> ChainSyncResult<&'static Abi> {
        ContractKind::from_str(name).map(|kind| kind.abi())
    }

    pub fn escrow(&self, address: EthAddress) -> Escrow<M> {
        Escrow::new(address, self.client.clone())
    }

    pub fn escrow_factory(&self, address: EthAddress) -> EscrowFactory<M> {
        EscrowFactory::new(address, self.client.clone())
    }

    pub fn token(&self, address: EthAddress) -> HMToken<M> {
        HMToken::new(address, self.client.clone())
    }
}
