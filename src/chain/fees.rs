//! Fee suggestions derived from the node's view of the fee market

use super::provider::rpc_error;
use super::{EthersLedgerClient, FeeEstimator, GasPriceTier};
use crate::config::TxManagerConfig;
use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Fee estimator backed by the same RPC endpoints used for queries
pub struct ProviderFeeEstimator {
    client: Arc<EthersLedgerClient>,
    /// Priority fee offered to block producers
    priority_fee: U256,
    /// Headroom on top of the base fee, in percent
    base_fee_reserve_percent: u64,
}

impl ProviderFeeEstimator {
    pub fn new(client: Arc<EthersLedgerClient>, config: &TxManagerConfig) -> Self {
        Self {
            client,
            priority_fee: config.priority_fee(),
            base_fee_reserve_percent: config.base_fee_reserve_percentage,
        }
    }
}

/// Max fee = base fee plus reserve, plus the priority fee
pub fn tiered_fee_from_base(
    base_fee: U256,
    priority_fee: U256,
    reserve_percent: u64,
) -> (U256, U256) {
    let max_fee = base_fee * (100 + reserve_percent) / 100 + priority_fee;
    (max_fee, priority_fee)
}

#[async_trait]
impl FeeEstimator for ProviderFeeEstimator {
    async fn suggest_tiered_fee(&self) -> TxResult<Option<(U256, U256)>> {
        let block = self
            .client
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| TxError::Rpc("No latest block".to_string()))?;

        // Chains without EIP-1559 report no base fee
        let fees = block.base_fee_per_gas.map(|base_fee| {
            tiered_fee_from_base(base_fee, self.priority_fee, self.base_fee_reserve_percent)
        });

        debug!("Tiered fee suggestion: {:?}", fees);
        Ok(fees)
    }

    async fn suggest_legacy_fee(&self, tier: GasPriceTier) -> TxResult<U256> {
        let price = self
            .client
            .http()
            .get_gas_price()
            .await
            .map_err(rpc_error)?;

        let adjusted = price * tier.percent() / 100;
        debug!("{:?} gas price is now {} wei", tier, adjusted);
        Ok(adjusted)
    }
}
