//! Configuration management for the transaction manager
//!
//! `TxManagerConfig` holds the submission policy knobs. `Settings` is the
//! on-disk layout used by the binary: TOML with `${VAR}` environment
//! substitution.

use crate::error::{TxError, TxResult};

use anyhow::{Context, Result};
use ethers::types::U256;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const WEI_PER_GWEI: f64 = 1_000_000_000.0;

/// Submission policy shared by every transaction created from one manager
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TxManagerConfig {
    /// Cap on automatic retries after a "nonce too low" rejection
    pub max_retries: u32,
    /// Proportional fee bump step, in percent
    pub gas_bump_percentage: u64,
    /// Absolute fee bump floor, in gwei
    pub min_gwei_bump: f64,
    /// How long a broadcast may stay pending before it is re-priced
    pub gas_bump_interval_ms: u64,
    /// Ceiling for every fee field, in gwei
    pub max_gas_price_gwei: f64,
    /// Safety multiplier applied to estimated gas
    pub gas_limit_multiplier: f64,
    pub poll_interval_ms: u64,
    /// Blocks required on top of the receipt block
    pub confirmations: u64,
    /// Re-estimate gas even if the caller supplied a limit
    pub estimate_gas: bool,
    /// Fail the submission when the mined receipt has status 0
    pub throw_on_revert: bool,
    /// Block gas ceiling; fetched from the latest block when unset
    pub block_gas_limit: Option<u64>,
    /// Prefer EIP-1559 fee fields when the caller did not pick a fee shape
    pub enable_eip1559: bool,
    /// Priority fee used when deriving EIP-1559 fees, in gwei
    pub priority_fee_gwei: f64,
    /// Headroom added on top of the current base fee, in percent
    pub base_fee_reserve_percentage: u64,
}

impl Default for TxManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            gas_bump_percentage: 5,
            min_gwei_bump: 1.0,
            gas_bump_interval_ms: 1000 * 60 * 5,
            max_gas_price_gwei: 1000.0,
            gas_limit_multiplier: 1.1,
            poll_interval_ms: 5000,
            confirmations: 8,
            estimate_gas: true,
            throw_on_revert: false,
            block_gas_limit: None,
            enable_eip1559: true,
            priority_fee_gwei: 3.0,
            base_fee_reserve_percentage: 25,
        }
    }
}

impl TxManagerConfig {
    pub fn max_gas_price(&self) -> U256 {
        gwei_to_wei(self.max_gas_price_gwei)
    }

    pub fn min_bump(&self) -> U256 {
        gwei_to_wei(self.min_gwei_bump)
    }

    pub fn priority_fee(&self) -> U256 {
        gwei_to_wei(self.priority_fee_gwei)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gas_bump_interval(&self) -> Duration {
        Duration::from_millis(self.gas_bump_interval_ms)
    }

    /// Apply the gas limit multiplier and cap the result at the block ceiling
    pub fn scale_gas_limit(&self, estimated: U256, block_gas_limit: U256) -> U256 {
        // The multiplier is at least 1, so anything at the ceiling stays there
        if estimated >= block_gas_limit {
            return block_gas_limit;
        }
        let scaled = (estimated.low_u128() as f64 * self.gas_limit_multiplier).floor();
        std::cmp::min(U256::from(scaled as u128), block_gas_limit)
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> TxResult<()> {
        if self.max_gas_price_gwei <= 0.0 {
            return Err(TxError::Config("max_gas_price_gwei must be positive".into()));
        }
        if self.min_gwei_bump < 0.0 || self.priority_fee_gwei < 0.0 {
            return Err(TxError::Config("gwei amounts must not be negative".into()));
        }
        if self.gas_limit_multiplier < 1.0 {
            return Err(TxError::Config(format!(
                "gas_limit_multiplier {} would under-provision gas",
                self.gas_limit_multiplier
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(TxError::Config("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

/// Convert a (possibly fractional) gwei amount to wei
pub fn gwei_to_wei(gwei: f64) -> U256 {
    U256::from((gwei * WEI_PER_GWEI).round() as u128)
}

/// Root configuration structure for the binary
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub manager: TxManagerConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Query endpoints, first one is the primary submission endpoint
    pub rpc_urls: Vec<String>,
    /// Extra endpoints that receive every signed transaction best-effort
    #[serde(default)]
    pub broadcast_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    pub to: String,
    /// Decimal wei amount
    #[serde(default)]
    pub value_wei: Option<String>,
    /// Hex-encoded calldata
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub gas_price_gwei: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from the file named by `TX_MANAGER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TX_MANAGER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_path(&config_path)
    }

    /// Load settings from a specific file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("No RPC URLs configured");
        }
        if self.transaction.to.is_empty() {
            anyhow::bail!("Transaction recipient is empty");
        }
        self.manager.validate()?;

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TX_MANAGER_TEST_VAR", "test_value");
        let input = "url = \"https://rpc.example.com/${TX_MANAGER_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://rpc.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults() {
        let config = TxManagerConfig::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.confirmations, 8);
        assert_eq!(config.gas_bump_interval(), Duration::from_secs(300));
        assert_eq!(config.max_gas_price(), U256::from(1_000_000_000_000u64));
        assert_eq!(config.min_bump(), U256::from(1_000_000_000u64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gwei_fractions() {
        assert_eq!(gwei_to_wei(0.5), U256::from(500_000_000u64));
        assert_eq!(gwei_to_wei(1.05), U256::from(1_050_000_000u64));
    }

    #[test]
    fn test_scale_gas_limit() {
        let config = TxManagerConfig::default();
        let block = U256::from(30_000_000u64);
        assert_eq!(config.scale_gas_limit(U256::from(21_000u64), block), U256::from(23_100u64));
        assert_eq!(config.scale_gas_limit(U256::from(40_000_000u64), block), block);
    }

    #[test]
    fn test_scale_gas_limit_keeps_fine_multipliers() {
        let config = TxManagerConfig {
            gas_limit_multiplier: 1.0001,
            ..Default::default()
        };
        let block = U256::from(30_000_000u64);
        assert_eq!(
            config.scale_gas_limit(U256::from(100_000u64), block),
            U256::from(100_010u64)
        );
        assert_eq!(
            config.scale_gas_limit(U256::from(29_999_000u64), block),
            block
        );
    }

    #[test]
    fn test_invalid_multiplier_rejected() {
        let config = TxManagerConfig {
            gas_limit_multiplier: 0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TxError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("TX_MANAGER_TEST_KEY_ENV", "RELAYER_KEY");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[manager]
confirmations = 3
gas_bump_interval_ms = 15000

[chain]
rpc_urls = ["http://localhost:8545"]
broadcast_urls = ["http://localhost:8546"]

[wallet]
private_key_env = "${{TX_MANAGER_TEST_KEY_ENV}}"

[transaction]
to = "0xA43Ce8Cc89Eff3AA5593c742fC56A30Ef2427CB0"
value_wei = "1"
gas_price_gwei = 1.0
"#
        )
        .unwrap();

        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.manager.confirmations, 3);
        assert_eq!(settings.manager.max_retries, 10);
        assert_eq!(settings.chain.broadcast_urls.len(), 1);
        assert_eq!(settings.wallet.private_key_env, "RELAYER_KEY");
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_missing_rpc_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[chain]
rpc_urls = []

[wallet]
private_key_env = "KEY"

[transaction]
to = "0x0039F22efB07A647557C7C5d17854CFD6D489eF3"
"#
        )
        .unwrap();

        assert!(Settings::from_path(file.path()).is_err());
    }
}
