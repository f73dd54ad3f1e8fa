//! Transaction submission with nonce sequencing, fee bumping and replacement

mod broadcast;
mod classify;
mod gas;
mod intent;
mod manager;
mod nonce;
mod submission;
mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::{content_hash, Broadcaster};
pub use classify::{classify, classify_error, ErrorClass};
pub use gas::FeePolicy;
pub use intent::{TransactionIntent, TxKind, TRANSFER_GAS};
pub use manager::TxManager;
pub use nonce::NonceTracker;
pub use submission::{Submission, SubmissionEvent, SubmissionHandle};
