//! Ethereum transaction manager
//!
//! Submits transactions from a single sender and sees them through to a
//! configurable number of confirmations. Transactions are executed one at a
//! time in creation order so nonces stay contiguous, stuck transactions are
//! re-priced, and a pending transaction can be replaced or cancelled.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use eth_tx_manager::chain::{EthersLedgerClient, ProviderFeeEstimator, WalletSigner};
//! # use eth_tx_manager::{TransactionIntent, TxManager, TxManagerConfig};
//! # async fn run() -> eth_tx_manager::TxResult<()> {
//! let config = TxManagerConfig::default();
//! let client = Arc::new(EthersLedgerClient::new(&["http://localhost:8545".to_string()])?);
//! let signer = Arc::new(WalletSigner::from_env("PRIVATE_KEY", client.clone())?);
//! let fees = Arc::new(ProviderFeeEstimator::new(client.clone(), &config));
//! let manager = TxManager::new(client, signer, fees, vec![], config)?;
//!
//! let to = "0x000000000000000000000000000000000000dEaD".parse().unwrap();
//! let submission = manager.create_submission(TransactionIntent::new(to).value(1u64));
//! let receipt = submission.send()?.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tx;

pub use config::TxManagerConfig;
pub use error::{TxError, TxResult};
pub use tx::{Submission, SubmissionEvent, SubmissionHandle, TransactionIntent, TxKind, TxManager};
