//! Durable record of pools, trades, positions, and balances.
//!
//! The in-memory position book stays authoritative at runtime; the ledger is
//! the durable copy used for reporting and recovery. Paper mode defaults to
//! the in-memory implementation, and either mode can persist to PostgreSQL
//! when `database.url` is configured.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{Pool, PoolStatus, PortfolioSummary, Position, PriceSample, Trade};
use crate::error::Result;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

/// Storage operations the engine requires.
///
/// All mutating operations are idempotent on their natural key (pool id,
/// trade signature, position pool id) so that retried writes after a
/// transient failure never double-apply.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record a newly discovered pool (no-op if already recorded)
    async fn record_pool(&self, pool: &Pool) -> Result<()>;

    /// Advance a pool's lifecycle status
    async fn update_pool_status(&self, pool_id: &str, status: PoolStatus) -> Result<()>;

    /// Append an immutable trade record (no-op on duplicate signature)
    async fn record_trade(&self, trade: &Trade) -> Result<()>;

    /// Persist a newly opened position
    async fn open_position(&self, position: &Position) -> Result<()>;

    /// Persist a position close (exit trade, P&L, status)
    async fn close_position(&self, position: &Position) -> Result<()>;

    /// Record a price/reserve snapshot for a monitored pool
    async fn record_snapshot(&self, sample: &PriceSample) -> Result<()>;

    /// Record the current balance for a mint (absolute value, upsert)
    async fn upsert_balance(&self, mint: &str, amount: rust_decimal::Decimal) -> Result<()>;

    /// All currently open positions
    async fn list_open_positions(&self) -> Result<Vec<Position>>;

    /// Aggregate portfolio view for reporting
    async fn portfolio_summary(&self) -> Result<PortfolioSummary>;
}

/// Mint identifier used for the quote-asset balance row
pub const QUOTE_MINT: &str = "SOL";
