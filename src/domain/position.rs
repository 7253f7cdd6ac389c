use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// An open or closed position on a pool.
///
/// The debounce counter and last observed price live here, mutated only by
/// the pool's monitor while it holds the position (single-owner discipline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub pool_id: String,
    /// Signature of the entry trade
    pub entry_trade_id: String,
    pub entry_price: Decimal,
    /// Base tokens held
    pub base_amount: Decimal,
    /// Quote spent on entry
    pub quote_spent: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    /// Consecutive samples at or above the take-profit threshold
    pub consecutive_profit_updates: u32,
    /// Most recent observed price
    pub last_price: Decimal,
    /// Filled on close
    pub exit_trade_id: Option<String>,
    pub exit_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Realized P&L in quote units (quote received minus quote spent)
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    pub fn open(
        pool_id: impl Into<String>,
        entry_trade_id: impl Into<String>,
        entry_price: Decimal,
        base_amount: Decimal,
        quote_spent: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            entry_trade_id: entry_trade_id.into(),
            entry_price,
            base_amount,
            quote_spent,
            opened_at,
            status: PositionStatus::Open,
            consecutive_profit_updates: 0,
            last_price: entry_price,
            exit_trade_id: None,
            exit_price: None,
            closed_at: None,
            realized_pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Profit fraction at `price` relative to entry: (price - entry) / entry
    pub fn profit_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price
    }

    /// Unrealized P&L in quote units at the last observed price
    pub fn unrealized_pnl(&self) -> Decimal {
        if !self.is_open() {
            return Decimal::ZERO;
        }
        self.base_amount * self.last_price - self.quote_spent
    }

    /// Seconds the position has been open at `now`
    pub fn held_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.opened_at).num_seconds().max(0) as u64
    }
}

/// Aggregated portfolio view for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Quote (SOL) balance
    pub balance: Decimal,
    pub open_positions: usize,
    pub total_trades: usize,
    /// Sum of unrealized P&L across open positions, quote units
    pub unrealized_pnl: Decimal,
    /// Sum of realized P&L across closed positions, quote units
    pub realized_pnl: Decimal,
}

impl fmt::Display for PortfolioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance={} open={} trades={} unrealized={} realized={}",
            self.balance, self.open_positions, self.total_trades, self.unrealized_pnl,
            self.realized_pnl
        )
    }
}
