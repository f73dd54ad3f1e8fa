//! Nonce tracking for one sender
//!
//! The tracker caches the next nonce to assign. It is seeded lazily from the
//! confirmed on-chain transaction count and only moves forward once a
//! submission has finished. It lives behind the manager's execution gate, so
//! at most one submission reads or writes it at a time.

use crate::chain::LedgerClient;
use crate::error::TxResult;

use ethers::types::Address;
use tracing::debug;

/// Cached next nonce of a sender
#[derive(Debug)]
pub struct NonceTracker {
    /// Wallet address
    address: Address,
    /// Next nonce to assign, unknown until first use
    next: Option<u64>,
}

impl NonceTracker {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            next: None,
        }
    }

    /// Next nonce to assign, fetched from the chain on first use
    pub async fn next(&mut self, ledger: &dyn LedgerClient) -> TxResult<u64> {
        if let Some(nonce) = self.next {
            return Ok(nonce);
        }

        let on_chain = ledger.transaction_count(self.address).await?;
        debug!("Initialized nonce for {:?}: {}", self.address, on_chain);
        self.next = Some(on_chain);
        Ok(on_chain)
    }

    /// Record that `nonce` is used; the next assignment is `nonce + 1`
    pub fn advance_past(&mut self, nonce: u64) {
        self.next = Some(nonce + 1);
    }

    /// Cached value without touching the chain
    pub fn current(&self) -> Option<u64> {
        self.next
    }
}
