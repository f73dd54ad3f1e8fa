//! Local private-key signer

use super::provider::rpc_error;
use super::{EthersLedgerClient, TxSigner};
use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tracing::info;

/// Signs with an in-memory key and estimates gas through the ledger client
pub struct WalletSigner {
    wallet: LocalWallet,
    client: Arc<EthersLedgerClient>,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet, client: Arc<EthersLedgerClient>) -> Self {
        info!("Signer initialized with wallet: {:?}", wallet.address());
        Self { wallet, client }
    }

    /// Load the private key from the named environment variable
    pub fn from_env(var: &str, client: Arc<EthersLedgerClient>) -> TxResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| TxError::Config(format!("Environment variable {} is not set", var)))?;

        let wallet = key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| TxError::Signing(format!("Invalid private key: {}", e)))?;

        Ok(Self::new(wallet, client))
    }
}

#[async_trait]
impl TxSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, tx: &TypedTransaction) -> TxResult<Bytes> {
        let mut tx = tx.clone();
        if tx.from().is_none() {
            tx.set_from(self.wallet.address());
        }

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| TxError::Signing(e.to_string()))?;

        Ok(tx.rlp_signed(&signature))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> TxResult<U256> {
        let mut tx = tx.clone();
        if tx.from().is_none() {
            tx.set_from(self.wallet.address());
        }

        self.client
            .http()
            .estimate_gas(&tx, None)
            .await
            .map_err(rpc_error)
    }
}
