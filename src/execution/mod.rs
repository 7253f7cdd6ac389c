//! Trade execution boundary.
//!
//! The engine never talks to a venue directly: every buy/sell goes through an
//! [`ExecutionAdapter`]. Paper mode wires in the [`paper::PaperExecutor`]
//! simulator, live mode the [`swap_service::SwapServiceAdapter`] HTTP client.
//! Adapters are called at most once per logical submission; retry policy
//! belongs to the queue and the engine, never to the adapter.

pub mod paper;
pub mod swap_service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use paper::{PaperExecConfig, PaperExecutor};
pub use swap_service::SwapServiceAdapter;

/// Buy instruction: spend `quote_amount` of SOL on the pool's base token.
#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub pool_id: String,
    pub quote_amount: Decimal,
    pub max_slippage_pct: Decimal,
    /// Latest observed pool price, used by the simulator as the fill anchor
    pub reference_price: Decimal,
}

/// Sell instruction: liquidate `base_amount` of the position's base token.
///
/// `position_pct` is carried alongside so a live venue that sizes sells as a
/// fraction of holdings can use it directly.
#[derive(Debug, Clone)]
pub struct SellOrder {
    pub pool_id: String,
    pub base_amount: Decimal,
    pub position_pct: Decimal,
    pub max_slippage_pct: Decimal,
    pub reference_price: Decimal,
}

/// A confirmed fill returned by an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    /// Transaction signature (unique, the idempotency key downstream)
    pub signature: String,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    /// Effective fill price (quote per base)
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Typed adapter failure. The adapter reports what happened; whether to
/// retry, expire the pool, or surface the error is the caller's decision.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// The venue rejected or reverted the swap
    #[error("execution rejected: {0}")]
    Rejected(String),

    /// The adapter could not reach the venue; the swap was never submitted
    #[error("execution transport error: {0}")]
    Transport(String),

    /// Slippage bound would be exceeded at the current price
    #[error("slippage exceeded: limit {limit}%, estimated {estimated}%")]
    SlippageExceeded { limit: Decimal, estimated: Decimal },
}

pub type ExecResult = std::result::Result<TradeFill, ExecutionError>;

/// Performs actual buys and sells against a venue.
///
/// Implementations must be safe to call at most once per logical submission:
/// the engine relies on one call producing at most one on-chain swap.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn buy(&self, order: &BuyOrder) -> ExecResult;
    async fn sell(&self, order: &SellOrder) -> ExecResult;

    /// Human-readable adapter name for logs
    fn name(&self) -> &'static str;
}
