pub mod config;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod feed;
pub mod ledger;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use domain::{
    ExpiryReason, Pool, PoolStatus, PortfolioSummary, Position, PositionStatus, PriceSample,
    Sizing, Trade, TradeRequest, TradeSide, TradeStatus,
};
pub use engine::{
    Engine, ExitDecision, ExitEvaluator, ExitReason, HourlyRateLimiter, MonitorSlots,
    PositionBook, TradeQueue,
};
pub use error::{Result, SniperError, TradeError};
pub use execution::{
    BuyOrder, ExecutionAdapter, ExecutionError, PaperExecConfig, PaperExecutor, SellOrder,
    SwapServiceAdapter, TradeFill,
};
pub use feed::{FeedEvent, WsFeed};
pub use ledger::{Ledger, MemoryLedger, PostgresLedger};
