//! Fee selection, capping and bumping

use super::intent::TxKind;
use crate::chain::{FeeEstimator, GasPrice, GasPriceTier};
use crate::config::TxManagerConfig;
use crate::error::TxResult;

use ethers::types::U256;
use std::cmp::{max, min};
use tracing::{debug, info};

/// Fee policy derived from the manager configuration
#[derive(Debug, Clone)]
pub struct FeePolicy {
    max_gas_price: U256,
    min_bump: U256,
    bump_percent: u64,
    enable_eip1559: bool,
}

impl FeePolicy {
    pub fn new(config: &TxManagerConfig) -> Self {
        Self {
            max_gas_price: config.max_gas_price(),
            min_bump: config.min_bump(),
            bump_percent: config.gas_bump_percentage,
            enable_eip1559: config.enable_eip1559,
        }
    }

    pub fn max_gas_price(&self) -> U256 {
        self.max_gas_price
    }

    /// Pick fees for an intent that did not specify any.
    ///
    /// Falls back to a legacy price when the chain reports no base fee.
    pub async fn suggest(
        &self,
        estimator: &dyn FeeEstimator,
        kind: Option<TxKind>,
    ) -> TxResult<GasPrice> {
        // An explicit envelope type wins over the configured default
        let want_tiered = match kind {
            Some(TxKind::Eip1559) => true,
            Some(TxKind::Legacy) => false,
            None => self.enable_eip1559,
        };

        if want_tiered {
            if let Some((max_fee, priority_fee)) = estimator.suggest_tiered_fee().await? {
                return Ok(self.cap(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                }));
            }
            debug!("No base fee reported, falling back to legacy gas price");
        }

        let price = estimator.suggest_legacy_fee(GasPriceTier::Fast).await?;
        Ok(self.cap(GasPrice::Legacy(price)))
    }

    /// Clamp every fee field to the ceiling; the priority fee never exceeds the max fee
    pub fn cap(&self, fees: GasPrice) -> GasPrice {
        match fees {
            GasPrice::Legacy(price) => GasPrice::Legacy(min(price, self.max_gas_price)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee_per_gas = min(max_fee_per_gas, self.max_gas_price);
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas: min(max_priority_fee_per_gas, max_fee_per_gas),
                }
            }
        }
    }

    /// Next fee level, or `None` if the current one already sits at the ceiling
    pub fn bump(&self, current: &GasPrice) -> Option<GasPrice> {
        if current.ceiling_field() >= self.max_gas_price {
            info!("Already at max gas price, not bumping");
            return None;
        }

        let bumped = match *current {
            GasPrice::Legacy(price) => GasPrice::Legacy(self.bump_value(price)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: self.bump_value(max_fee_per_gas),
                max_priority_fee_per_gas: self.bump_value(max_priority_fee_per_gas),
            },
        };

        let bumped = self.cap(bumped);
        info!("Increasing gas params to {:?}", bumped);
        Some(bumped)
    }

    fn bump_value(&self, old: U256) -> U256 {
        let proportional = old * (100 + self.bump_percent) / 100;
        max(proportional, old + self.min_bump)
    }

    /// Fees for a replacement: never below what the replaced transaction offers.
    /// The shape follows the transaction being replaced.
    pub fn floor(current: &GasPrice, requested: Option<GasPrice>) -> GasPrice {
        match (*current, requested) {
            (GasPrice::Legacy(price), Some(requested)) => {
                GasPrice::Legacy(max(price, requested.ceiling_field()))
            }
            (GasPrice::Legacy(price), None) => GasPrice::Legacy(price),
            (
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                requested,
            ) => {
                let (req_max, req_priority) = match requested {
                    Some(GasPrice::Eip1559 {
                        max_fee_per_gas,
                        max_priority_fee_per_gas,
                    }) => (max_fee_per_gas, max_priority_fee_per_gas),
                    Some(GasPrice::Legacy(price)) => (price, price),
                    None => (U256::zero(), U256::zero()),
                };
                GasPrice::Eip1559 {
                    max_fee_per_gas: max(max_fee_per_gas, req_max),
                    max_priority_fee_per_gas: max(max_priority_fee_per_gas, req_priority),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockFeeEstimator;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn policy(max_gwei: f64) -> FeePolicy {
        FeePolicy::new(&TxManagerConfig {
            max_gas_price_gwei: max_gwei,
            ..Default::default()
        })
    }

    #[test]
    fn test_min_bump_dominates_small_prices() {
        // 1 gwei * 1.05 < 1 gwei + 1 gwei
        let bumped = policy(1000.0).bump(&GasPrice::Legacy(gwei(1)));
        assert_eq!(bumped, Some(GasPrice::Legacy(gwei(2))));
    }

    #[test]
    fn test_percentage_dominates_large_prices() {
        let bumped = policy(1000.0).bump(&GasPrice::Legacy(gwei(100)));
        assert_eq!(bumped, Some(GasPrice::Legacy(gwei(105))));
    }

    #[test]
    fn test_bump_is_capped() {
        let bumped = policy(150.0).bump(&GasPrice::Legacy(gwei(149)));
        assert_eq!(bumped, Some(GasPrice::Legacy(gwei(150))));
    }

    #[test]
    fn test_no_bump_at_ceiling() {
        let policy = policy(150.0);
        assert_eq!(policy.bump(&GasPrice::Legacy(gwei(150))), None);
        assert_eq!(policy.bump(&GasPrice::Legacy(gwei(200))), None);
    }

    #[test]
    fn test_tiered_bump_caps_priority_at_max_fee() {
        let bumped = policy(10.0)
            .bump(&GasPrice::Eip1559 {
                max_fee_per_gas: gwei(9),
                max_priority_fee_per_gas: gwei(9),
            })
            .unwrap();

        assert_eq!(
            bumped,
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(10),
                max_priority_fee_per_gas: gwei(10),
            }
        );
    }

    #[test]
    fn test_repeated_bumps_are_monotonic() {
        let policy = policy(20.0);
        let mut fees = GasPrice::Eip1559 {
            max_fee_per_gas: gwei(3),
            max_priority_fee_per_gas: gwei(1),
        };

        while let Some(next) = policy.bump(&fees) {
            assert!(next.ceiling_field() > fees.ceiling_field());
            assert!(next.ceiling_field() <= gwei(20));
            fees = next;
        }
        assert_eq!(fees.ceiling_field(), gwei(20));
    }

    #[test]
    fn test_replacement_floor() {
        let current = GasPrice::Legacy(gwei(5));
        assert_eq!(
            FeePolicy::floor(&current, Some(GasPrice::Legacy(gwei(1)))),
            GasPrice::Legacy(gwei(5))
        );
        assert_eq!(
            FeePolicy::floor(&current, Some(GasPrice::Legacy(gwei(8)))),
            GasPrice::Legacy(gwei(8))
        );

        let tiered = GasPrice::Eip1559 {
            max_fee_per_gas: gwei(30),
            max_priority_fee_per_gas: gwei(2),
        };
        assert_eq!(FeePolicy::floor(&tiered, None), tiered);
        assert_eq!(
            FeePolicy::floor(
                &tiered,
                Some(GasPrice::Eip1559 {
                    max_fee_per_gas: gwei(20),
                    max_priority_fee_per_gas: gwei(4),
                })
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(30),
                max_priority_fee_per_gas: gwei(4),
            }
        );
    }

    #[tokio::test]
    async fn test_suggest_prefers_tiered_fees() {
        let mut estimator = MockFeeEstimator::new();
        estimator
            .expect_suggest_tiered_fee()
            .times(1)
            .returning(|| Ok(Some((gwei(2000), gwei(3)))));
        estimator.expect_suggest_legacy_fee().never();

        let fees = policy(1000.0).suggest(&estimator, None).await.unwrap();
        assert_eq!(
            fees,
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(1000),
                max_priority_fee_per_gas: gwei(3),
            }
        );
    }

    #[tokio::test]
    async fn test_suggest_falls_back_to_legacy() {
        let mut estimator = MockFeeEstimator::new();
        estimator.expect_suggest_tiered_fee().returning(|| Ok(None));
        estimator
            .expect_suggest_legacy_fee()
            .withf(|tier| *tier == GasPriceTier::Fast)
            .returning(|_| Ok(gwei(40)));

        let fees = policy(1000.0).suggest(&estimator, None).await.unwrap();
        assert_eq!(fees, GasPrice::Legacy(gwei(40)));
    }

    #[tokio::test]
    async fn test_legacy_kind_skips_tiered_query() {
        let mut estimator = MockFeeEstimator::new();
        estimator.expect_suggest_tiered_fee().never();
        estimator.expect_suggest_legacy_fee().returning(|_| Ok(gwei(5000)));

        let fees = policy(1000.0)
            .suggest(&estimator, Some(TxKind::Legacy))
            .await
            .unwrap();
        assert_eq!(fees, GasPrice::Legacy(gwei(1000)));
    }

    #[tokio::test]
    async fn test_explicit_eip1559_kind_overrides_config() {
        let mut estimator = MockFeeEstimator::new();
        estimator
            .expect_suggest_tiered_fee()
            .times(1)
            .returning(|| Ok(Some((gwei(30), gwei(2)))));
        estimator.expect_suggest_legacy_fee().never();

        let policy = FeePolicy::new(&TxManagerConfig {
            enable_eip1559: false,
            ..Default::default()
        });

        let fees = policy.suggest(&estimator, Some(TxKind::Eip1559)).await.unwrap();
        assert_eq!(
            fees,
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(30),
                max_priority_fee_per_gas: gwei(2),
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_eip1559_uses_legacy_by_default() {
        let mut estimator = MockFeeEstimator::new();
        estimator.expect_suggest_tiered_fee().never();
        estimator.expect_suggest_legacy_fee().returning(|_| Ok(gwei(7)));

        let policy = FeePolicy::new(&TxManagerConfig {
            enable_eip1559: false,
            ..Default::default()
        });

        let fees = policy.suggest(&estimator, None).await.unwrap();
        assert_eq!(fees, GasPrice::Legacy(gwei(7)));
    }
}
