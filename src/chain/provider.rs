//! Ledger client with multi-RPC support and automatic failover

use super::LedgerClient;
use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
///
/// Read queries rotate to the next URL when the transport fails. Errors the
/// node itself reports are returned as-is so they can be classified.
pub struct EthersLedgerClient {
    urls: Vec<String>,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl EthersLedgerClient {
    /// Create a client over one or more RPC URLs
    pub fn new(rpc_urls: &[String]) -> TxResult<Self> {
        let mut urls = Vec::new();
        let mut http_providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider);
                    urls.push(url.clone());
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TxError::Config("No valid RPC providers".to_string()));
        }

        Ok(Self {
            urls,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Failover to provider {}", self.urls[next]);
    }

    /// Run a read query, rotating providers on transport failures
    async fn query<T, F, Fut>(&self, operation: &str, f: F) -> TxResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match f(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if RpcError::as_error_response(&e).is_some() => return Err(rpc_error(e)),
                Err(e) => {
                    warn!("Failed to {} from {}: {}", operation, self.endpoint(), e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error
            .map(rpc_error)
            .unwrap_or_else(|| TxError::Rpc(format!("All providers failed to {}", operation))))
    }
}

/// Map a provider error to the node's own message when it sent one
pub(crate) fn rpc_error(e: ProviderError) -> TxError {
    let message = RpcError::as_error_response(&e)
        .map(|response| response.message.clone())
        .unwrap_or_else(|| e.to_string());
    TxError::Rpc(message)
}

/// Narrow a quantity reported by the node, rejecting values that do not fit
pub(crate) fn checked_u64(value: U256, what: &str) -> TxResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(TxError::Rpc(format!("Node reported an out of range {}: {}", what, value)));
    }
    Ok(value.as_u64())
}

#[async_trait]
impl LedgerClient for EthersLedgerClient {
    async fn latest_block_gas_limit(&self) -> TxResult<U256> {
        let block = self
            .query("get latest block", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await?
            .ok_or_else(|| TxError::Rpc("No latest block".to_string()))?;

        Ok(block.gas_limit)
    }

    async fn chain_id(&self) -> TxResult<u64> {
        let chain_id = self
            .query("get chain id", |p| async move { p.get_chainid().await })
            .await?;
        checked_u64(chain_id, "chain id")
    }

    async fn transaction_receipt(&self, hash: H256) -> TxResult<Option<TransactionReceipt>> {
        self.query("get transaction receipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }

    async fn block_number(&self) -> TxResult<u64> {
        let block = self
            .query("get block number", |p| async move { p.get_block_number().await })
            .await?;
        Ok(block.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> TxResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(rpc_error)?;
        Ok(pending.tx_hash())
    }

    async fn transaction_count(&self, address: Address) -> TxResult<u64> {
        let count = self
            .query("get transaction count", |p| async move {
                p.get_transaction_count(address, Some(BlockNumber::Latest.into()))
                    .await
            })
            .await?;
        checked_u64(count, "transaction count")
    }

    fn endpoint(&self) -> String {
        let idx = self.current_provider.load(Ordering::Relaxed);
        self.urls[idx % self.urls.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    #[test]
    fn test_rpc_error_prefers_node_message() {
        let node_error = HttpClientError::JsonRpcError(JsonRpcError {
            code: -32000,
            message: "nonce too low".to_string(),
            data: None,
        });
        let error = rpc_error(ProviderError::JsonRpcClientError(Box::new(node_error)));
        assert_eq!(error, TxError::Rpc("nonce too low".to_string()));

        let transport = rpc_error(ProviderError::CustomError("connection reset".to_string()));
        assert!(matches!(transport, TxError::Rpc(message) if message.contains("connection reset")));
    }

    #[test]
    fn test_checked_u64() {
        assert_eq!(checked_u64(U256::from(5u64), "chain id"), Ok(5));
        assert_eq!(checked_u64(U256::from(u64::MAX), "chain id"), Ok(u64::MAX));
        assert!(matches!(
            checked_u64(U256::from(u64::MAX) + 1, "transaction count"),
            Err(TxError::Rpc(_))
        ));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let result = EthersLedgerClient::new(&["not a url".to_string()]);
        assert!(matches!(result, Err(TxError::Config(_))));
    }

    #[test]
    fn test_failover_rotates_endpoints() {
        let client = EthersLedgerClient::new(&[
            "http://localhost:8545".to_string(),
            "http://localhost:9545".to_string(),
        ])
        .unwrap();

        assert_eq!(client.endpoint(), "http://localhost:8545");
        client.failover();
        assert_eq!(client.endpoint(), "http://localhost:9545");
        client.failover();
        assert_eq!(client.endpoint(), "http://localhost:8545");
    }
}
