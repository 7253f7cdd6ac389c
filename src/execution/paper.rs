//! Paper execution simulator.
//!
//! Fills orders against the last observed pool price with a configurable
//! half-spread and fill delay, minting `paper-…` signatures. No external
//! side effects; balances live entirely in the position book.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{BuyOrder, ExecResult, ExecutionAdapter, ExecutionError, SellOrder, TradeFill};

/// Simulator tuning
#[derive(Debug, Clone)]
pub struct PaperExecConfig {
    /// Full spread as a fraction of price (e.g. 0.02 = 2%); buys fill a
    /// half-spread above the reference, sells a half-spread below
    pub spread_pct: Decimal,
    /// Average simulated fill delay
    pub fill_delay_ms: u64,
    /// Randomize the delay by up to ±50%
    pub jitter: bool,
}

impl Default for PaperExecConfig {
    fn default() -> Self {
        Self {
            spread_pct: dec!(0.02),
            fill_delay_ms: 50,
            jitter: true,
        }
    }
}

impl PaperExecConfig {
    /// Instant, spread-free fills (used by tests and scenario replays)
    pub fn frictionless() -> Self {
        Self {
            spread_pct: Decimal::ZERO,
            fill_delay_ms: 0,
            jitter: false,
        }
    }
}

/// Simulated execution adapter for paper trading
pub struct PaperExecutor {
    config: PaperExecConfig,
}

impl PaperExecutor {
    pub fn new(config: PaperExecConfig) -> Self {
        Self { config }
    }

    fn half_spread(&self, price: Decimal) -> Decimal {
        price * self.config.spread_pct / dec!(2)
    }

    async fn simulate_latency(&self) {
        if self.config.fill_delay_ms == 0 {
            return;
        }
        let delay_ms = if self.config.jitter {
            let base = self.config.fill_delay_ms;
            rand::thread_rng().gen_range(base / 2..=base + base / 2)
        } else {
            self.config.fill_delay_ms
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    fn check_slippage(&self, order_limit: Decimal) -> Result<(), ExecutionError> {
        // The simulated spread is the only slippage source here
        let estimated = self.config.spread_pct * dec!(100) / dec!(2);
        if estimated > order_limit {
            return Err(ExecutionError::SlippageExceeded {
                limit: order_limit,
                estimated,
            });
        }
        Ok(())
    }
}

impl Default for PaperExecutor {
    fn default() -> Self {
        Self::new(PaperExecConfig::default())
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutor {
    async fn buy(&self, order: &BuyOrder) -> ExecResult {
        if order.reference_price <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "no valid reference price for pool {}",
                order.pool_id
            )));
        }
        self.check_slippage(order.max_slippage_pct)?;
        self.simulate_latency().await;

        let fill_price = order.reference_price + self.half_spread(order.reference_price);
        let base_amount = order.quote_amount / fill_price;
        let signature = format!("paper-buy-{}-{}", order.pool_id, Uuid::new_v4());

        debug!(
            pool_id = %order.pool_id,
            %fill_price,
            %base_amount,
            "paper buy filled"
        );

        Ok(TradeFill {
            signature,
            base_amount,
            quote_amount: order.quote_amount,
            price: fill_price,
            timestamp: Utc::now(),
        })
    }

    async fn sell(&self, order: &SellOrder) -> ExecResult {
        if order.reference_price <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "no valid reference price for pool {}",
                order.pool_id
            )));
        }
        if order.base_amount <= Decimal::ZERO {
            return Err(ExecutionError::Rejected("nothing to sell".to_string()));
        }
        self.check_slippage(order.max_slippage_pct)?;
        self.simulate_latency().await;

        let fill_price = order.reference_price - self.half_spread(order.reference_price);
        let quote_amount = order.base_amount * fill_price;
        let signature = format!("paper-sell-{}-{}", order.pool_id, Uuid::new_v4());

        debug!(
            pool_id = %order.pool_id,
            %fill_price,
            %quote_amount,
            "paper sell filled"
        );

        Ok(TradeFill {
            signature,
            base_amount: order.base_amount,
            quote_amount,
            price: fill_price,
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_order(price: Decimal) -> BuyOrder {
        BuyOrder {
            pool_id: "pool-1".into(),
            quote_amount: dec!(0.005),
            max_slippage_pct: dec!(5),
            reference_price: price,
        }
    }

    #[tokio::test]
    async fn test_buy_pays_half_spread() {
        let exec = PaperExecutor::new(PaperExecConfig {
            spread_pct: dec!(0.02),
            fill_delay_ms: 0,
            jitter: false,
        });

        let fill = exec.buy(&buy_order(dec!(0.000001))).await.unwrap();
        // 1% above reference
        assert_eq!(fill.price, dec!(0.00000101));
        assert_eq!(fill.quote_amount, dec!(0.005));
        assert!(fill.signature.starts_with("paper-buy-pool-1-"));
    }

    #[tokio::test]
    async fn test_frictionless_fills_at_reference() {
        let exec = PaperExecutor::new(PaperExecConfig::frictionless());

        let fill = exec.buy(&buy_order(dec!(0.000001))).await.unwrap();
        assert_eq!(fill.price, dec!(0.000001));
        assert_eq!(fill.base_amount, dec!(5000));
    }

    #[tokio::test]
    async fn test_sell_receives_half_spread_below() {
        let exec = PaperExecutor::new(PaperExecConfig {
            spread_pct: dec!(0.02),
            fill_delay_ms: 0,
            jitter: false,
        });

        let order = SellOrder {
            pool_id: "pool-1".into(),
            base_amount: dec!(5000),
            position_pct: dec!(100),
            max_slippage_pct: dec!(5),
            reference_price: dec!(0.000002),
        };
        let fill = exec.sell(&order).await.unwrap();
        assert_eq!(fill.price, dec!(0.00000198));
        assert_eq!(fill.quote_amount, dec!(0.0099));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_reference() {
        let exec = PaperExecutor::new(PaperExecConfig::frictionless());
        let err = exec.buy(&buy_order(Decimal::ZERO)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_slippage_bound_enforced() {
        let exec = PaperExecutor::new(PaperExecConfig {
            spread_pct: dec!(0.20), // 10% half-spread
            fill_delay_ms: 0,
            jitter: false,
        });
        let mut order = buy_order(dec!(0.000001));
        order.max_slippage_pct = dec!(5);
        let err = exec.buy(&order).await.unwrap_err();
        assert!(matches!(err, ExecutionError::SlippageExceeded { .. }));
    }
}
