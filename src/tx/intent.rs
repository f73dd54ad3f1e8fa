//! Caller-supplied transaction description

use crate::chain::GasPrice;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS: u64 = 21_000;

/// Envelope type of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Legacy,
    Eip1559,
}

/// What the caller wants on chain. Unset fields are filled in during preparation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionIntent {
    pub to: Option<Address>,
    pub from: Option<Address>,
    pub nonce: Option<u64>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub data: Bytes,
    pub value: U256,
    pub chain_id: Option<u64>,
    pub kind: Option<TxKind>,
}

impl TransactionIntent {
    pub fn new(to: Address) -> Self {
        Self {
            to: Some(to),
            ..Default::default()
        }
    }

    /// Zero-value self transfer used to cancel a pending transaction
    pub fn cancellation(sender: Address) -> Self {
        Self {
            to: Some(sender),
            from: Some(sender),
            gas_limit: Some(U256::from(TRANSFER_GAS)),
            ..Default::default()
        }
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = value.into();
        self
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn gas_limit(mut self, gas_limit: impl Into<U256>) -> Self {
        self.gas_limit = Some(gas_limit.into());
        self
    }

    pub fn gas_price(mut self, gas_price: impl Into<U256>) -> Self {
        self.set_fees(GasPrice::Legacy(gas_price.into()));
        self
    }

    pub fn eip1559_fees(mut self, max_fee: impl Into<U256>, priority_fee: impl Into<U256>) -> Self {
        self.set_fees(GasPrice::Eip1559 {
            max_fee_per_gas: max_fee.into(),
            max_priority_fee_per_gas: priority_fee.into(),
        });
        self
    }

    pub fn kind(mut self, kind: TxKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Fee fields, if the intent carries a legacy price or a complete EIP-1559 pair
    pub fn fees(&self) -> Option<GasPrice> {
        if let Some(price) = self.gas_price {
            return Some(GasPrice::Legacy(price));
        }
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Some(GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            _ => None,
        }
    }

    /// Overwrite the fee fields, switching the envelope type to match
    pub fn set_fees(&mut self, fees: GasPrice) {
        match fees {
            GasPrice::Legacy(price) => {
                self.gas_price = Some(price);
                self.max_fee_per_gas = None;
                self.max_priority_fee_per_gas = None;
                self.kind = Some(TxKind::Legacy);
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                self.gas_price = None;
                self.max_fee_per_gas = Some(max_fee_per_gas);
                self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
                self.kind = Some(TxKind::Eip1559);
            }
        }
    }

    /// Build the ethers request for signing or estimation
    pub fn to_typed(&self) -> TypedTransaction {
        let legacy = match self.fees() {
            Some(GasPrice::Legacy(_)) => true,
            Some(GasPrice::Eip1559 { .. }) => false,
            None => self.kind == Some(TxKind::Legacy),
        };

        if legacy {
            let mut tx = TransactionRequest::new().value(self.value).data(self.data.clone());
            tx.to = self.to.map(Into::into);
            tx.from = self.from;
            tx.nonce = self.nonce.map(U256::from);
            tx.gas = self.gas_limit;
            tx.gas_price = self.gas_price;
            tx.chain_id = self.chain_id.map(Into::into);
            TypedTransaction::Legacy(tx)
        } else {
            let mut tx = Eip1559TransactionRequest::new()
                .value(self.value)
                .data(self.data.clone());
            tx.to = self.to.map(Into::into);
            tx.from = self.from;
            tx.nonce = self.nonce.map(U256::from);
            tx.gas = self.gas_limit;
            tx.max_fee_per_gas = self.max_fee_per_gas;
            tx.max_priority_fee_per_gas = self.max_priority_fee_per_gas;
            tx.chain_id = self.chain_id.map(Into::into);
            TypedTransaction::Eip1559(tx)
        }
    }
}
