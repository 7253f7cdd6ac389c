//! In-memory position book.
//!
//! Authoritative runtime state for balances and positions. Confirmed fills
//! are applied exactly once per signature; persistence to the ledger is
//! retried and surfaced as `TradeError::LedgerWrite` when it keeps failing,
//! while the in-memory state remains authoritative either way.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::domain::{
    Pool, PortfolioSummary, Position, PositionStatus, Trade, TradeSide, TradeStatus,
};
use crate::error::TradeError;
use crate::execution::TradeFill;
use crate::ledger::{Ledger, QUOTE_MINT};

const LEDGER_RETRY_ATTEMPTS: u32 = 3;
const LEDGER_RETRY_DELAY_MS: u64 = 200;

struct BookState {
    /// Quote (SOL) balance
    quote_balance: Decimal,
    /// Base token balances by mint
    base_balances: HashMap<String, Decimal>,
    /// Positions by pool id (open and closed)
    positions: HashMap<String, Position>,
    /// Signatures whose balance adjustment has been applied
    applied: HashSet<String>,
    total_trades: usize,
}

/// Balances and positions, persisted through the ledger
pub struct PositionBook {
    state: RwLock<BookState>,
    ledger: Arc<dyn Ledger>,
}

impl PositionBook {
    pub fn new(starting_balance: Decimal, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            state: RwLock::new(BookState {
                quote_balance: starting_balance,
                base_balances: HashMap::new(),
                positions: HashMap::new(),
                applied: HashSet::new(),
                total_trades: 0,
            }),
            ledger,
        }
    }

    /// Open a position from a confirmed buy fill.
    ///
    /// Rejects a second open for the same pool and debits the quote balance
    /// exactly once per signature; a duplicate signature returns the already
    /// opened position unchanged.
    pub async fn open_position(
        &self,
        pool: &Pool,
        fill: &TradeFill,
    ) -> Result<Position, TradeError> {
        let (position, trade, quote_balance, base_balance) = {
            let mut state = self.state.write().await;

            if state.applied.contains(&fill.signature) {
                let existing = state
                    .positions
                    .get(&pool.pool_id)
                    .cloned()
                    .ok_or_else(|| TradeError::LedgerWrite(format!(
                        "signature {} applied but no position recorded",
                        fill.signature
                    )))?;
                warn!(
                    pool_id = %pool.pool_id,
                    signature = %fill.signature,
                    "duplicate buy fill ignored"
                );
                return Ok(existing);
            }

            if state
                .positions
                .get(&pool.pool_id)
                .map(|p| p.is_open())
                .unwrap_or(false)
            {
                return Err(TradeError::DuplicatePosition {
                    pool_id: pool.pool_id.clone(),
                });
            }

            if state.quote_balance < fill.quote_amount {
                return Err(TradeError::InsufficientBalance {
                    required: fill.quote_amount,
                    available: state.quote_balance,
                });
            }

            state.quote_balance -= fill.quote_amount;
            let base_balance = {
                let entry = state
                    .base_balances
                    .entry(pool.base_mint.clone())
                    .or_insert(Decimal::ZERO);
                *entry += fill.base_amount;
                *entry
            };

            let position = Position::open(
                pool.pool_id.clone(),
                fill.signature.clone(),
                fill.price,
                fill.base_amount,
                fill.quote_amount,
                fill.timestamp,
            );
            state
                .positions
                .insert(pool.pool_id.clone(), position.clone());
            state.applied.insert(fill.signature.clone());
            state.total_trades += 1;

            let trade = Trade {
                signature: fill.signature.clone(),
                pool_id: pool.pool_id.clone(),
                side: TradeSide::Buy,
                base_amount: fill.base_amount,
                quote_amount: fill.quote_amount,
                price: fill.price,
                timestamp: fill.timestamp,
                status: TradeStatus::Confirmed,
            };

            (position, trade, state.quote_balance, base_balance)
        };

        info!(
            pool_id = %pool.pool_id,
            entry_price = %position.entry_price,
            base_amount = %position.base_amount,
            quote_spent = %position.quote_spent,
            "position opened"
        );

        self.persist_open(pool, &trade, &position, quote_balance, base_balance)
            .await?;

        Ok(position)
    }

    /// Close a position from a confirmed sell fill; realized P&L is quote
    /// received minus quote spent.
    pub async fn close_position(
        &self,
        pool: &Pool,
        fill: &TradeFill,
    ) -> Result<Position, TradeError> {
        let (position, trade, quote_balance, base_balance) = {
            let mut state = self.state.write().await;

            if state.applied.contains(&fill.signature) {
                let existing = state
                    .positions
                    .get(&pool.pool_id)
                    .cloned()
                    .ok_or_else(|| TradeError::LedgerWrite(format!(
                        "signature {} applied but no position recorded",
                        fill.signature
                    )))?;
                warn!(
                    pool_id = %pool.pool_id,
                    signature = %fill.signature,
                    "duplicate sell fill ignored"
                );
                return Ok(existing);
            }

            let position = state.positions.get_mut(&pool.pool_id).ok_or_else(|| {
                TradeError::NoOpenPosition {
                    pool_id: pool.pool_id.clone(),
                }
            })?;
            if !position.is_open() {
                return Err(TradeError::NoOpenPosition {
                    pool_id: pool.pool_id.clone(),
                });
            }

            let realized_pnl = fill.quote_amount - position.quote_spent;
            position.status = PositionStatus::Closed;
            position.exit_trade_id = Some(fill.signature.clone());
            position.exit_price = Some(fill.price);
            position.closed_at = Some(fill.timestamp);
            position.realized_pnl = Some(realized_pnl);
            position.last_price = fill.price;
            let position = position.clone();

            state.quote_balance += fill.quote_amount;
            let base_balance = {
                let entry = state
                    .base_balances
                    .entry(pool.base_mint.clone())
                    .or_insert(Decimal::ZERO);
                // Never drive a base balance negative on a partial-sell
                // mismatch; clamp and let reconciliation spot the gap.
                *entry = (*entry - fill.base_amount).max(Decimal::ZERO);
                *entry
            };
            state.applied.insert(fill.signature.clone());
            state.total_trades += 1;

            let trade = Trade {
                signature: fill.signature.clone(),
                pool_id: pool.pool_id.clone(),
                side: TradeSide::Sell,
                base_amount: fill.base_amount,
                quote_amount: fill.quote_amount,
                price: fill.price,
                timestamp: fill.timestamp,
                status: TradeStatus::Confirmed,
            };

            (position, trade, state.quote_balance, base_balance)
        };

        info!(
            pool_id = %pool.pool_id,
            exit_price = %fill.price,
            realized_pnl = %position.realized_pnl.unwrap_or(Decimal::ZERO),
            "position closed"
        );

        self.persist_close(pool, &trade, &position, quote_balance, base_balance)
            .await?;

        Ok(position)
    }

    /// Current open position for a pool, if any
    pub async fn open_position_for(&self, pool_id: &str) -> Option<Position> {
        let state = self.state.read().await;
        state
            .positions
            .get(pool_id)
            .filter(|p| p.is_open())
            .cloned()
    }

    /// Record the latest observed price on an open position (monitor-owned
    /// debounce state is written back here after evaluation).
    pub async fn update_position(&self, position: &Position) {
        let mut state = self.state.write().await;
        if let Some(existing) = state.positions.get_mut(&position.pool_id) {
            if existing.is_open() {
                *existing = position.clone();
            }
        }
    }

    pub async fn quote_balance(&self) -> Decimal {
        self.state.read().await.quote_balance
    }

    /// Aggregate snapshot across balances and positions
    pub async fn summary(&self) -> PortfolioSummary {
        let state = self.state.read().await;
        let open: Vec<&Position> = state.positions.values().filter(|p| p.is_open()).collect();

        PortfolioSummary {
            balance: state.quote_balance,
            open_positions: open.len(),
            total_trades: state.total_trades,
            unrealized_pnl: open.iter().map(|p| p.unrealized_pnl()).sum(),
            realized_pnl: state
                .positions
                .values()
                .filter_map(|p| p.realized_pnl)
                .sum(),
        }
    }

    async fn persist_open(
        &self,
        pool: &Pool,
        trade: &Trade,
        position: &Position,
        quote_balance: Decimal,
        base_balance: Decimal,
    ) -> Result<(), TradeError> {
        self.persist_with_retry("record_trade", || self.ledger.record_trade(trade))
            .await?;
        self.persist_with_retry("open_position", || self.ledger.open_position(position))
            .await?;
        self.persist_with_retry("balance", || {
            self.ledger.upsert_balance(QUOTE_MINT, quote_balance)
        })
        .await?;
        self.persist_with_retry("balance", || {
            self.ledger.upsert_balance(&pool.base_mint, base_balance)
        })
        .await
    }

    async fn persist_close(
        &self,
        pool: &Pool,
        trade: &Trade,
        position: &Position,
        quote_balance: Decimal,
        base_balance: Decimal,
    ) -> Result<(), TradeError> {
        self.persist_with_retry("record_trade", || self.ledger.record_trade(trade))
            .await?;
        self.persist_with_retry("close_position", || self.ledger.close_position(position))
            .await?;
        self.persist_with_retry("balance", || {
            self.ledger.upsert_balance(QUOTE_MINT, quote_balance)
        })
        .await?;
        self.persist_with_retry("balance", || {
            self.ledger.upsert_balance(&pool.base_mint, base_balance)
        })
        .await
    }

    /// Retry a ledger write a few times before surfacing the failure.
    /// Losing this write means losing track of real exposure, so the error
    /// is never swallowed.
    async fn persist_with_retry<'a, F, Fut>(
        &'a self,
        op: &'static str,
        mut write: F,
    ) -> Result<(), TradeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<()>> + 'a,
    {
        let mut last_err = String::new();
        for attempt in 1..=LEDGER_RETRY_ATTEMPTS {
            match write().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = e.to_string();
                    warn!(op, attempt, error = %last_err, "ledger write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        LEDGER_RETRY_DELAY_MS * attempt as u64,
                    ))
                    .await;
                }
            }
        }

        error!(op, error = %last_err, "ledger write failed after retries");
        Err(TradeError::LedgerWrite(format!("{}: {}", op, last_err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn pool() -> Pool {
        Pool::new("pool-1", "MintBase111", "So11111111111111111111111111111111111111112", 9, 9, Utc::now())
    }

    fn buy_fill(signature: &str) -> TradeFill {
        TradeFill {
            signature: signature.to_string(),
            base_amount: dec!(5000),
            quote_amount: dec!(0.005),
            price: dec!(0.000001),
            timestamp: Utc::now(),
        }
    }

    fn sell_fill(signature: &str, quote: Decimal) -> TradeFill {
        TradeFill {
            signature: signature.to_string(),
            base_amount: dec!(5000),
            quote_amount: quote,
            price: quote / dec!(5000),
            timestamp: Utc::now(),
        }
    }

    fn book() -> PositionBook {
        PositionBook::new(dec!(10), Arc::new(MemoryLedger::new()))
    }

    #[tokio::test]
    async fn test_open_then_close_round_trip() {
        let book = book();
        let pool = pool();

        let position = book.open_position(&pool, &buy_fill("sig-buy")).await.unwrap();
        assert!(position.is_open());
        assert_eq!(book.quote_balance().await, dec!(9.995));

        let closed = book
            .close_position(&pool, &sell_fill("sig-sell", dec!(0.0060)))
            .await
            .unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, Some(dec!(0.0010)));
        assert_eq!(book.quote_balance().await, dec!(10.0010));
        assert!(book.open_position_for("pool-1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_open_rejected() {
        let book = book();
        let pool = pool();

        book.open_position(&pool, &buy_fill("sig-1")).await.unwrap();
        let err = book
            .open_position(&pool, &buy_fill("sig-2"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TradeError::DuplicatePosition {
                pool_id: "pool-1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_signature_applied_once() {
        let book = book();
        let pool = pool();

        book.open_position(&pool, &buy_fill("sig-1")).await.unwrap();
        // Retried submission delivering the same confirmed fill again
        let position = book.open_position(&pool, &buy_fill("sig-1")).await.unwrap();
        assert!(position.is_open());

        // Balance debited exactly once
        assert_eq!(book.quote_balance().await, dec!(9.995));
        assert_eq!(book.summary().await.total_trades, 1);
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejected() {
        let book = PositionBook::new(dec!(0.001), Arc::new(MemoryLedger::new()));
        let pool = pool();

        let err = book
            .open_position(&pool, &buy_fill("sig-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::InsufficientBalance { .. }));
        // Nothing applied
        assert_eq!(book.quote_balance().await, dec!(0.001));
    }

    #[tokio::test]
    async fn test_close_without_open_rejected() {
        let book = book();
        let pool = pool();

        let err = book
            .close_position(&pool, &sell_fill("sig-sell", dec!(0.005)))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::NoOpenPosition { .. }));
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let book = book();
        let pool = pool();

        book.open_position(&pool, &buy_fill("sig-1")).await.unwrap();
        let summary = book.summary().await;
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.total_trades, 1);

        book.close_position(&pool, &sell_fill("sig-2", dec!(0.0045)))
            .await
            .unwrap();
        let summary = book.summary().await;
        assert_eq!(summary.open_positions, 0);
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.realized_pnl, dec!(-0.0005));
    }
}
