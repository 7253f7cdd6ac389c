//! In-memory ledger: paper-mode default and test double.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Pool, PoolStatus, PortfolioSummary, Position, PriceSample, Trade};
use crate::error::Result;

use super::{Ledger, QUOTE_MINT};

#[derive(Default)]
struct MemoryState {
    pools: HashMap<String, Pool>,
    /// Keyed by signature; insertion order preserved separately for counting
    trades: HashMap<String, Trade>,
    trade_order: Vec<String>,
    positions: HashMap<String, Position>,
    snapshots: HashMap<String, Vec<PriceSample>>,
    balances: HashMap<String, Decimal>,
}

/// Ledger implementation backed by process memory
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded trades (test helper)
    pub async fn trade_count(&self) -> usize {
        self.state.read().await.trade_order.len()
    }

    /// Recorded trade by signature (test helper)
    pub async fn trade(&self, signature: &str) -> Option<Trade> {
        self.state.read().await.trades.get(signature).cloned()
    }

    /// Snapshot count for a pool (test helper)
    pub async fn snapshot_count(&self, pool_id: &str) -> usize {
        self.state
            .read()
            .await
            .snapshots
            .get(pool_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub async fn pool_status(&self, pool_id: &str) -> Option<PoolStatus> {
        self.state.read().await.pools.get(pool_id).map(|p| p.status)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_pool(&self, pool: &Pool) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .pools
            .entry(pool.pool_id.clone())
            .or_insert_with(|| pool.clone());
        Ok(())
    }

    async fn update_pool_status(&self, pool_id: &str, status: PoolStatus) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(pool) = state.pools.get_mut(pool_id) {
            pool.status = status;
        }
        Ok(())
    }

    async fn record_trade(&self, trade: &Trade) -> Result<()> {
        let mut state = self.state.write().await;
        if state.trades.contains_key(&trade.signature) {
            debug!(signature = %trade.signature, "duplicate trade record ignored");
            return Ok(());
        }
        state.trade_order.push(trade.signature.clone());
        state.trades.insert(trade.signature.clone(), trade.clone());
        Ok(())
    }

    async fn open_position(&self, position: &Position) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .positions
            .insert(position.pool_id.clone(), position.clone());
        Ok(())
    }

    async fn close_position(&self, position: &Position) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .positions
            .insert(position.pool_id.clone(), position.clone());
        Ok(())
    }

    async fn record_snapshot(&self, sample: &PriceSample) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .snapshots
            .entry(sample.pool_id.clone())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn upsert_balance(&self, mint: &str, amount: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        state.balances.insert(mint.to_string(), amount);
        Ok(())
    }

    async fn list_open_positions(&self) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect())
    }

    async fn portfolio_summary(&self) -> Result<PortfolioSummary> {
        let state = self.state.read().await;

        let balance = state
            .balances
            .get(QUOTE_MINT)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let open: Vec<&Position> = state.positions.values().filter(|p| p.is_open()).collect();
        let unrealized_pnl = open.iter().map(|p| p.unrealized_pnl()).sum();
        let realized_pnl = state
            .positions
            .values()
            .filter_map(|p| p.realized_pnl)
            .sum();

        Ok(PortfolioSummary {
            balance,
            open_positions: open.len(),
            total_trades: state.trade_order.len(),
            unrealized_pnl,
            realized_pnl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TradeSide, TradeStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_trade(signature: &str) -> Trade {
        Trade {
            signature: signature.to_string(),
            pool_id: "pool-1".to_string(),
            side: TradeSide::Buy,
            base_amount: dec!(5000),
            quote_amount: dec!(0.005),
            price: dec!(0.000001),
            timestamp: Utc::now(),
            status: TradeStatus::Confirmed,
        }
    }

    #[tokio::test]
    async fn test_duplicate_trade_ignored() {
        let ledger = MemoryLedger::new();
        ledger.record_trade(&sample_trade("sig-1")).await.unwrap();
        ledger.record_trade(&sample_trade("sig-1")).await.unwrap();
        assert_eq!(ledger.trade_count().await, 1);
    }

    #[tokio::test]
    async fn test_summary_reflects_positions_and_balance() {
        let ledger = MemoryLedger::new();
        ledger.upsert_balance(QUOTE_MINT, dec!(9.995)).await.unwrap();
        ledger.record_trade(&sample_trade("sig-1")).await.unwrap();

        let mut position = Position::open(
            "pool-1",
            "sig-1",
            dec!(0.000001),
            dec!(5000),
            dec!(0.005),
            Utc::now(),
        );
        position.last_price = dec!(0.0000012);
        ledger.open_position(&position).await.unwrap();

        let summary = ledger.portfolio_summary().await.unwrap();
        assert_eq!(summary.balance, dec!(9.995));
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.total_trades, 1);
        assert_eq!(summary.unrealized_pnl, dec!(0.001));
    }
}
