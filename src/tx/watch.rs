//! Waiting for confirmations
//!
//! The wait alternates between two states. While `Pending`, the sender's
//! on-chain transaction count is polled until it moves past our nonce, fees
//! being bumped whenever the last broadcast has gone stale. Once the nonce is
//! consumed, the receipt of whichever of our hashes got mined is located and
//! the wait moves to `Observed`, counting blocks until enough confirmations
//! have accumulated. A receipt that disappears (reorg) drops back to
//! `Pending`.

use super::submission::{SubmissionEvent, Worker};
use crate::error::{TxError, TxResult};

use ethers::types::{TransactionReceipt, H256, U64};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receipt lookups after the nonce was seen consumed
const RECEIPT_RETRY_ATTEMPTS: u32 = 5;
const RECEIPT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchState {
    Pending,
    Observed(H256),
}

pub(crate) enum Transition {
    /// Evaluate the next state right away
    Now(WatchState),
    /// Evaluate the next state after one poll interval
    AfterPoll(WatchState),
    Done(TransactionReceipt),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ObservedStatus {
    Vanished,
    Confirming(u64),
    Confirmed(u64),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PendingStatus {
    Waiting,
    Stale,
    NonceConsumed,
}

/// Depth of a receipt relative to the chain head
pub(crate) fn assess_observed(receipt_block: Option<u64>, head: u64, required: u64) -> ObservedStatus {
    match receipt_block {
        None => ObservedStatus::Vanished,
        Some(block) => {
            let depth = head.saturating_sub(block);
            if depth >= required {
                ObservedStatus::Confirmed(depth)
            } else {
                ObservedStatus::Confirming(depth)
            }
        }
    }
}

pub(crate) fn assess_pending(
    ledger_count: u64,
    assigned_nonce: u64,
    since_broadcast: Duration,
    bump_interval: Duration,
) -> PendingStatus {
    if ledger_count > assigned_nonce {
        PendingStatus::NonceConsumed
    } else if since_broadcast >= bump_interval {
        PendingStatus::Stale
    } else {
        PendingStatus::Waiting
    }
}

impl Worker {
    pub(super) async fn watch(&mut self) -> TxResult<TransactionReceipt> {
        let poll_interval = self.manager.config.poll_interval();
        let mut state = WatchState::Pending;

        loop {
            self.handle_pending_commands().await;

            let step = match state {
                WatchState::Pending => self.poll_pending().await,
                WatchState::Observed(hash) => self.poll_observed(hash).await,
            };

            state = match step {
                Ok(Transition::Done(receipt)) => return Ok(receipt),
                Ok(Transition::Now(next)) => next,
                Ok(Transition::AfterPoll(next)) => {
                    self.pause(poll_interval).await;
                    next
                }
                // Query failures are transient; poll the same state again
                Err(TxError::Rpc(message)) => {
                    warn!("Ledger query failed while waiting: {}", message);
                    self.pause(poll_interval).await;
                    state
                }
                Err(e) => return Err(e),
            };
        }
    }

    async fn poll_pending(&mut self) -> TxResult<Transition> {
        let nonce = self.assigned_nonce()?;
        let ledger = self.manager.ledger.clone();
        let ledger_count = ledger
            .transaction_count(self.manager.signer.address())
            .await?;

        let status = assess_pending(
            ledger_count,
            nonce,
            self.last_broadcast.elapsed(),
            self.manager.config.gas_bump_interval(),
        );

        match status {
            PendingStatus::Waiting => Ok(Transition::AfterPoll(WatchState::Pending)),
            PendingStatus::Stale => {
                if self.bump_fees() {
                    info!("Resubmitting with higher gas params");
                    self.broadcast().await?;
                    Ok(Transition::Now(WatchState::Pending))
                } else {
                    debug!("Already at max gas price, not bumping");
                    Ok(Transition::AfterPoll(WatchState::Pending))
                }
            }
            PendingStatus::NonceConsumed => match self.find_receipt_with_retries(nonce).await {
                Ok(receipt) => {
                    let hash = receipt.transaction_hash;
                    info!(
                        "Transaction {:?} mined in block {:?}",
                        hash, receipt.block_number
                    );
                    self.last_confirmations = None;
                    self.emit(SubmissionEvent::Mined(receipt));
                    Ok(Transition::Now(WatchState::Observed(hash)))
                }
                Err(TxError::ReceiptUnresolved { nonce }) => {
                    warn!(
                        "Nonce {} was used by a transaction we don't know, resubmitting with the next nonce",
                        nonce
                    );
                    self.intent.nonce = Some(nonce + 1);
                    self.broadcast().await?;
                    Ok(Transition::Now(WatchState::Pending))
                }
                Err(e) => Err(e),
            },
        }
    }

    async fn poll_observed(&mut self, hash: H256) -> TxResult<Transition> {
        let ledger = self.manager.ledger.clone();
        let Some(receipt) = ledger.transaction_receipt(hash).await? else {
            return Ok(self.vanished(hash));
        };
        let head = ledger.block_number().await?;
        let receipt_block = receipt.block_number.map(|block| block.as_u64());

        match assess_observed(receipt_block, head, self.manager.config.confirmations) {
            ObservedStatus::Vanished => Ok(self.vanished(hash)),
            ObservedStatus::Confirming(depth) => {
                self.report_confirmations(depth);
                Ok(Transition::AfterPoll(WatchState::Observed(hash)))
            }
            ObservedStatus::Confirmed(depth) => {
                self.report_confirmations(depth);
                if self.manager.config.throw_on_revert && receipt.status == Some(U64::zero()) {
                    return Err(TxError::RevertedTransaction { hash });
                }
                Ok(Transition::Done(receipt))
            }
        }
    }

    fn vanished(&mut self, hash: H256) -> Transition {
        warn!("Receipt for {:?} is gone, waiting for the transaction again", hash);
        self.last_confirmations = None;
        Transition::Now(WatchState::Pending)
    }

    fn report_confirmations(&mut self, depth: u64) {
        if self.last_confirmations != Some(depth) {
            debug!("Transaction has {} confirmations", depth);
            self.last_confirmations = Some(depth);
            self.emit(SubmissionEvent::Confirmations(depth));
        }
    }

    /// The nonce is used, but receipts can lag behind the transaction count
    async fn find_receipt_with_retries(&self, nonce: u64) -> TxResult<TransactionReceipt> {
        if let Some(receipt) = self.find_receipt().await? {
            return Ok(receipt);
        }

        info!("Can't find our transaction receipt, retrying a few times");
        for _ in 0..RECEIPT_RETRY_ATTEMPTS {
            tokio::time::sleep(RECEIPT_RETRY_DELAY).await;
            if let Some(receipt) = self.find_receipt().await? {
                return Ok(receipt);
            }
        }

        Err(TxError::ReceiptUnresolved { nonce })
    }

    /// Newest hashes first, they are the likeliest to be mined
    async fn find_receipt(&self) -> TxResult<Option<TransactionReceipt>> {
        for hash in self.hashes.iter().rev() {
            if let Some(receipt) = self.manager.ledger.transaction_receipt(*hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }
}
