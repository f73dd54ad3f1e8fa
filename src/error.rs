//! Error types for the transaction manager

use ethers::types::H256;
use thiserror::Error;

/// Main error type for transaction submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("The transaction was already executed")]
    AlreadyExecuted,

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Nonce {nonce} is still too low after {retries} retries")]
    SequenceConflict { nonce: u64, retries: u32 },

    #[error("Already at max gas price, but still not enough to submit the transaction: {0}")]
    FeeTooLow(String),

    #[error("EVM execution failed, so the transaction {hash:?} was reverted")]
    RevertedTransaction { hash: H256 },

    #[error("Send error: {0}")]
    UnclassifiedSubmit(String),

    #[error("No receipt found for a mined transaction with nonce {nonce}")]
    ReceiptUnresolved { nonce: u64 },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The transaction is no longer pending")]
    NotPending,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error category reported alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Misuse,
    Configuration,
    Ledger,
    Network,
    Internal,
}

impl TxError {
    /// Check if the operation that produced this error may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxError::Rpc(_) | TxError::ReceiptUnresolved { .. })
    }

    /// Categorise the error so callers can tell a bad setup from a flaky node
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxError::AlreadyExecuted | TxError::NotPending => ErrorKind::Misuse,
            TxError::Config(_) | TxError::FeeTooLow(_) | TxError::Signing(_) => {
                ErrorKind::Configuration
            }
            TxError::GasEstimation(_)
            | TxError::SequenceConflict { .. }
            | TxError::RevertedTransaction { .. }
            | TxError::UnclassifiedSubmit(_) => ErrorKind::Ledger,
            TxError::Rpc(_) | TxError::ReceiptUnresolved { .. } => ErrorKind::Network,
            TxError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Raw message a ledger node attached to this error, if any
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            TxError::Rpc(message) => Some(message),
            _ => None,
        }
    }
}

/// Result type for transaction manager operations
pub type TxResult<T> = Result<T, TxError>;
