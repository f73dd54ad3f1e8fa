//! Chain module - the ledger-facing collaborators of the transaction manager
//!
//! This module provides:
//! - `LedgerClient`: read queries and raw transaction submission
//! - `TxSigner`: the sending identity, signing and gas estimation
//! - `FeeEstimator`: legacy and EIP-1559 fee suggestions
//! - ethers-backed implementations of all three

pub mod fees;
pub mod provider;
pub mod wallet;

pub use fees::ProviderFeeEstimator;
pub use provider::EthersLedgerClient;
pub use wallet::WalletSigner;

use crate::error::TxResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Query and submission surface of a ledger node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Gas limit of the latest block
    async fn latest_block_gas_limit(&self) -> TxResult<U256>;

    async fn chain_id(&self) -> TxResult<u64>;

    async fn transaction_receipt(&self, hash: H256) -> TxResult<Option<TransactionReceipt>>;

    /// Current head block number
    async fn block_number(&self) -> TxResult<u64>;

    /// Submit a signed transaction, returning the hash the node computed
    async fn send_raw_transaction(&self, raw: Bytes) -> TxResult<H256>;

    /// Confirmed transaction count of `address`, ignoring pending ones
    async fn transaction_count(&self, address: Address) -> TxResult<u64>;

    /// Human readable endpoint name for logs
    fn endpoint(&self) -> String;
}

/// Holder of the sending identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign and RLP-encode a transaction
    async fn sign(&self, tx: &TypedTransaction) -> TxResult<Bytes>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> TxResult<U256>;
}

/// Fee market oracle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    /// `(max_fee_per_gas, max_priority_fee_per_gas)`, or `None` on chains without a base fee
    async fn suggest_tiered_fee(&self) -> TxResult<Option<(U256, U256)>>;

    async fn suggest_legacy_fee(&self, tier: GasPriceTier) -> TxResult<U256>;
}

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// The field compared against the configured ceiling
    pub fn ceiling_field(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }
}

/// Legacy gas price speed tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPriceTier {
    Instant,
    Fast,
    Standard,
    Slow,
}

impl GasPriceTier {
    /// Percentage applied to the node's gas price for this tier
    pub fn percent(&self) -> u64 {
        match self {
            GasPriceTier::Instant => 130,
            GasPriceTier::Fast => 115,
            GasPriceTier::Standard => 100,
            GasPriceTier::Slow => 90,
        }
    }
}
