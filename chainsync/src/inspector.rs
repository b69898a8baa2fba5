// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::EscrowReader;
use crate::error::ChainSyncResult;
use crate::types::{EscrowInfo, EthAddress};
use std::sync::Arc;

/// Reads the manifest URL and lifecycle status of an escrow.
#[derive(Clone)]
pub struct EscrowInspector {
    reader: Arc<dyn EscrowReader>,
}

impl EscrowInspector {
    pub fn new(reader: Arc<dyn EscrowReader>) -> Self {
        Self { reader }
    }

    pub async fn inspect(&self, escrow: EthAddress) -> ChainSyncResult<EscrowInfo> {
        let (manifest_url, raw_status) = futures::future::try_join(
            self.reader.manifest_url(escrow),
            self.reader.status(escrow),
        )
        .await?;
        tracing::debug!(
            "[EscrowInspector] escrow={:?} manifest_url={} raw_status={}",
            escrow,
            manifest_url,
            raw_status
        );
        Ok(EscrowInfo {
            manifest_url,
            raw_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainSyncError;
    use crate::test_utils::FakeChain;
    use crate::types::EscrowStatus;

    #[tokio::test]
    async fn test_inspect_reads_manifest_and_status() {
        let chain = FakeChain::new();
        let escrow = EthAddress::repeat_byte(0xe1);
        chain.set_escrow(escrow, EthAddress::repeat_byte(0xf1), "https://x/y", 1);
        let inspector = EscrowInspector::new(Arc::new(chain.clone()));

        let info = inspector.inspect(escrow).await.unwrap();
        assert_eq!(info.manifest_url, "https://x/y");
        assert_eq!(info.status(), Some(EscrowStatus::Pending));
        assert_eq!(chain.read_calls(escrow), 2);
    }

    #[tokio::test]
    async fn test_inspect_propagates_read_failures() {
        let chain = FakeChain::new();
        let escrow = EthAddress::repeat_byte(0xe2);
        chain.set_escrow(escrow, EthAddress::repeat_byte(0xf1), "https://x/y", 1);
        chain.break_inspection(escrow);
        let inspector = EscrowInspector::new(Arc::new(chain));

        let err = inspector.inspect(escrow).await.unwrap_err();
        assert!(matches!(err, ChainSyncError::ChainRead(_)));
    }
}
