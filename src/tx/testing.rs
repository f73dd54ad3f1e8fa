//! In-memory chain for lifecycle tests
//!
//! `FakeChain` plays node, signer and fee oracle at once. Pending
//! transactions are mined whenever the sender's transaction count is queried,
//! and every block number query advances the head by one block.

use super::broadcast::content_hash;
use super::manager::TxManager;
use crate::chain::{FeeEstimator, GasPriceTier, LedgerClient, TxSigner};
use crate::config::TxManagerConfig;
use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) const SENDER: Address = Address::repeat_byte(0x11);
pub(crate) const RECIPIENT: Address = Address::repeat_byte(0x22);

pub(crate) fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}

pub(crate) struct ChainState {
    pub chain_id: u64,
    pub block_gas_limit: U256,
    pub head: u64,
    /// Mined transaction count of `SENDER`
    pub count: u64,
    /// Pending transactions paying less than this stay in the mempool
    pub min_gas_price: U256,
    pub gas_estimate: U256,
    pub legacy_fee: U256,
    pub tiered_fee: Option<(U256, U256)>,
    /// Scripted node errors for the next submissions
    pub submit_errors: VecDeque<String>,
    pub estimate_errors: VecDeque<String>,
    /// Mined receipts get status 0
    pub revert: bool,
    /// The next accepted transaction loses its nonce to someone else
    pub hijack_next: bool,
    /// The n-th successful receipt lookup pretends the receipt is gone
    pub hide_lookup: Option<u32>,
    pub receipt_lookups: u32,
    /// Every payload a node accepted, in order
    pub sent: Vec<TypedTransaction>,
    pub signed: HashMap<H256, TypedTransaction>,
    pub mempool: BTreeMap<u64, (H256, TypedTransaction)>,
    pub receipts: HashMap<H256, TransactionReceipt>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            block_gas_limit: U256::from(30_000_000u64),
            head: 100,
            count: 3,
            min_gas_price: U256::zero(),
            gas_estimate: U256::from(21_000u64),
            legacy_fee: gwei(1),
            tiered_fee: None,
            submit_errors: VecDeque::new(),
            estimate_errors: VecDeque::new(),
            revert: false,
            hijack_next: false,
            hide_lookup: None,
            receipt_lookups: 0,
            sent: Vec::new(),
            signed: HashMap::new(),
            mempool: BTreeMap::new(),
            receipts: HashMap::new(),
        }
    }
}

impl ChainState {
    fn mine(&mut self) {
        while let Some((hash, tx)) = self.mempool.get(&self.count).cloned() {
            if tx.gas_price().unwrap_or_default() < self.min_gas_price {
                break;
            }
            self.mempool.remove(&self.count);
            self.head += 1;
            let receipt = TransactionReceipt {
                transaction_hash: hash,
                block_number: Some(U64::from(self.head)),
                from: SENDER,
                to: tx.to_addr().copied(),
                status: Some(U64::from(if self.revert { 0 } else { 1 })),
                gas_used: tx.gas().copied(),
                ..Default::default()
            };
            self.receipts.insert(hash, receipt);
            self.count += 1;
        }
    }
}

pub(crate) struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub(crate) fn new(state: ChainState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn sent_nonces(&self) -> Vec<u64> {
        self.state()
            .sent
            .iter()
            .map(|tx| tx.nonce().map(|n| n.as_u64()).unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl LedgerClient for FakeChain {
    async fn latest_block_gas_limit(&self) -> TxResult<U256> {
        Ok(self.state().block_gas_limit)
    }

    async fn chain_id(&self) -> TxResult<u64> {
        Ok(self.state().chain_id)
    }

    async fn transaction_receipt(&self, hash: H256) -> TxResult<Option<TransactionReceipt>> {
        let mut state = self.state();
        let Some(receipt) = state.receipts.get(&hash).cloned() else {
            return Ok(None);
        };
        state.receipt_lookups += 1;
        if state.hide_lookup == Some(state.receipt_lookups) {
            return Ok(None);
        }
        Ok(Some(receipt))
    }

    async fn block_number(&self) -> TxResult<u64> {
        let mut state = self.state();
        state.head += 1;
        Ok(state.head)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> TxResult<H256> {
        let mut state = self.state();
        let hash = content_hash(&raw);
        let tx = state
            .signed
            .get(&hash)
            .cloned()
            .ok_or_else(|| TxError::Rpc("invalid transaction".into()))?;
        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();

        if let Some(message) = state.submit_errors.pop_front() {
            if message.contains("already known") {
                state.sent.push(tx.clone());
                state.mempool.insert(nonce, (hash, tx));
            }
            return Err(TxError::Rpc(message));
        }

        if nonce < state.count {
            return Err(TxError::Rpc("nonce too low".into()));
        }
        if let Some((queued_hash, queued)) = state.mempool.get(&nonce) {
            if *queued_hash != hash && queued.gas_price() >= tx.gas_price() {
                return Err(TxError::Rpc("replacement transaction underpriced".into()));
            }
        }

        if state.hijack_next && nonce == state.count {
            state.hijack_next = false;
            state.count += 1;
        }
        state.sent.push(tx.clone());
        state.mempool.insert(nonce, (hash, tx));
        Ok(hash)
    }

    async fn transaction_count(&self, _address: Address) -> TxResult<u64> {
        let mut state = self.state();
        state.mine();
        Ok(state.count)
    }

    fn endpoint(&self) -> String {
        "fake".to_string()
    }
}

#[async_trait]
impl TxSigner for FakeChain {
    fn address(&self) -> Address {
        SENDER
    }

    async fn sign(&self, tx: &TypedTransaction) -> TxResult<Bytes> {
        let mut tx = tx.clone();
        tx.set_from(SENDER);
        let raw = format!("{:?}", tx).into_bytes();
        self.state().signed.insert(content_hash(&raw), tx);
        Ok(Bytes::from(raw))
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> TxResult<U256> {
        let mut state = self.state();
        match state.estimate_errors.pop_front() {
            Some(message) => Err(TxError::Rpc(message)),
            None => Ok(state.gas_estimate),
        }
    }
}

#[async_trait]
impl FeeEstimator for FakeChain {
    async fn suggest_tiered_fee(&self) -> TxResult<Option<(U256, U256)>> {
        Ok(self.state().tiered_fee)
    }

    async fn suggest_legacy_fee(&self, _tier: GasPriceTier) -> TxResult<U256> {
        Ok(self.state().legacy_fee)
    }
}

/// Quick polling, two confirmations, legacy fees unless asked otherwise
pub(crate) fn test_config() -> TxManagerConfig {
    TxManagerConfig {
        poll_interval_ms: 1000,
        gas_bump_interval_ms: 60_000,
        confirmations: 2,
        max_gas_price_gwei: 100.0,
        enable_eip1559: false,
        ..Default::default()
    }
}

pub(crate) fn manager_on(chain: &Arc<FakeChain>, config: TxManagerConfig) -> TxManager {
    TxManager::new(
        chain.clone(),
        chain.clone(),
        chain.clone(),
        vec![],
        config,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::gwei_to_wei;

    #[test]
    fn test_gwei_helper_matches_config_conversion() {
        assert_eq!(gwei(3), gwei_to_wei(3.0));
    }

    #[tokio::test]
    async fn test_defaults_build_with_struct_update() {
        let chain = FakeChain::new(ChainState {
            count: 7,
            ..Default::default()
        });
        assert_eq!(chain.transaction_count(SENDER).await.unwrap(), 7);
        assert!(chain.state().receipts.is_empty());
    }
}
