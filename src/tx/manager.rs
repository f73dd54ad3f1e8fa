//! Transaction manager: shared state and factory for submissions

use super::broadcast::Broadcaster;
use super::gas::FeePolicy;
use super::intent::TransactionIntent;
use super::nonce::NonceTracker;
use super::submission::Submission;
use crate::chain::{FeeEstimator, LedgerClient, TxSigner};
use crate::config::TxManagerConfig;
use crate::error::{TxError, TxResult};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Share of the latest block gas limit a single transaction may use
const BLOCK_GAS_LIMIT_PERCENT: u64 = 95;

/// State only the submission holding the execution gate may touch
#[derive(Debug)]
pub(crate) struct GateState {
    pub(crate) nonces: NonceTracker,
    chain_id: Option<u64>,
}

impl GateState {
    /// Chain id, fetched once
    pub(crate) async fn chain_id(&mut self, ledger: &dyn LedgerClient) -> TxResult<u64> {
        if let Some(chain_id) = self.chain_id {
            return Ok(chain_id);
        }
        let chain_id = ledger.chain_id().await?;
        debug!("Connected to chain {}", chain_id);
        self.chain_id = Some(chain_id);
        Ok(chain_id)
    }
}

pub(crate) struct ManagerShared {
    pub(crate) ledger: Arc<dyn LedgerClient>,
    pub(crate) signer: Arc<dyn TxSigner>,
    pub(crate) fee_estimator: Arc<dyn FeeEstimator>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) config: TxManagerConfig,
    pub(crate) fee_policy: FeePolicy,
    /// Execution gate. Held by one submission from preparation until it settles;
    /// waiters are admitted in FIFO order.
    pub(crate) gate: Mutex<GateState>,
    block_gas_limit: OnceCell<U256>,
}

impl ManagerShared {
    /// Block gas ceiling, from config or fetched once from the latest block
    pub(crate) async fn block_gas_limit(&self) -> TxResult<U256> {
        self.block_gas_limit
            .get_or_try_init(|| async {
                if let Some(limit) = self.config.block_gas_limit {
                    return Ok::<U256, TxError>(U256::from(limit));
                }
                let latest = self.ledger.latest_block_gas_limit().await?;
                let limit = latest * BLOCK_GAS_LIMIT_PERCENT / 100;
                debug!("Block gas limit is {}", limit);
                Ok(limit)
            })
            .await
            .copied()
    }
}

/// Serialises transactions from one sender and hands out submissions
#[derive(Clone)]
pub struct TxManager {
    shared: Arc<ManagerShared>,
}

impl TxManager {
    /// Create a manager. `broadcast_nodes` receive every signed payload best-effort.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn TxSigner>,
        fee_estimator: Arc<dyn FeeEstimator>,
        broadcast_nodes: Vec<Arc<dyn LedgerClient>>,
        config: TxManagerConfig,
    ) -> TxResult<Self> {
        config.validate()?;

        let address = signer.address();
        info!(
            "Transaction manager for {:?} ({} broadcast nodes)",
            address,
            broadcast_nodes.len()
        );

        let shared = ManagerShared {
            broadcaster: Broadcaster::new(ledger.clone(), broadcast_nodes),
            ledger,
            signer,
            fee_estimator,
            fee_policy: FeePolicy::new(&config),
            config,
            gate: Mutex::new(GateState {
                nonces: NonceTracker::new(address),
                chain_id: None,
            }),
            block_gas_limit: OnceCell::new(),
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Wrap an intent in a submission. No network access happens until `send`.
    pub fn create_submission(&self, intent: TransactionIntent) -> Submission {
        Submission::new(self.shared.clone(), intent)
    }

    /// Sending address
    pub fn address(&self) -> Address {
        self.shared.signer.address()
    }

    pub fn config(&self) -> &TxManagerConfig {
        &self.shared.config
    }

    /// Cached next nonce. Waits for the running submission, if any, to settle.
    pub async fn next_nonce(&self) -> Option<u64> {
        self.shared.gate.lock().await.nonces.current()
    }
}
