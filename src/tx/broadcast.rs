//! Fan-out of signed transactions to several endpoints

use crate::chain::LedgerClient;
use crate::error::TxResult;

use ethers::types::{Bytes, H256};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends each signed payload to a primary endpoint and, best-effort, to any
/// number of secondary endpoints. Only the primary's answer counts.
pub struct Broadcaster {
    primary: Arc<dyn LedgerClient>,
    secondaries: Vec<Arc<dyn LedgerClient>>,
}

impl Broadcaster {
    pub fn new(primary: Arc<dyn LedgerClient>, secondaries: Vec<Arc<dyn LedgerClient>>) -> Self {
        Self {
            primary,
            secondaries,
        }
    }

    pub async fn broadcast(&self, raw: Bytes) -> TxResult<H256> {
        for node in &self.secondaries {
            let node = node.clone();
            let raw = raw.clone();
            tokio::spawn(async move {
                match node.send_raw_transaction(raw).await {
                    Ok(hash) => debug!("Secondary {} accepted {:?}", node.endpoint(), hash),
                    Err(e) => {
                        crate::metrics::record_secondary_failure();
                        warn!(
                            "Failed to send transaction to node {}: {}",
                            node.endpoint(),
                            e
                        );
                    }
                }
            });
        }

        self.primary.send_raw_transaction(raw).await
    }
}

/// Transaction hash of a signed, encoded payload
pub fn content_hash(raw: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(raw))
}
