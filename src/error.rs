use thiserror::Error;

/// Main error type for the sniper engine
#[derive(Error, Debug)]
pub enum SniperError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Feed errors
    #[error("Invalid feed event: {0}")]
    InvalidEvent(String),

    #[error("Feed disconnected: {0}")]
    FeedDisconnected(String),

    // Ledger errors
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SniperError
pub type Result<T> = std::result::Result<T, SniperError>;

/// Per-submission error type returned through the trade queue.
///
/// Every rejected or failed submission resolves to one of these variants;
/// callers (the engine, the pool monitors) match on them to decide whether
/// the pool retries, returns to monitoring, or expires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("Rate limited: {current}/{limit} trades this hour")]
    RateLimited { limit: u32, current: u32 },

    #[error("Pool in cooldown: {remaining_secs}s remaining")]
    Cooldown { remaining_secs: u64 },

    #[error("Submission already in flight for pool {pool_id}")]
    AlreadyInFlight { pool_id: String },

    #[error("Trade queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Submission deadline exceeded after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Pool {pool_id} already has an open position")]
    DuplicatePosition { pool_id: String },

    #[error("No open position for pool {pool_id}")]
    NoOpenPosition { pool_id: String },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Ledger write failed: {0}")]
    LedgerWrite(String),

    #[error("Queue is shutting down")]
    Shutdown,
}

impl TradeError {
    /// Whether the pool may legitimately re-submit later (rejection at
    /// admission, no execution attempted).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradeError::RateLimited { .. }
                | TradeError::Cooldown { .. }
                | TradeError::AlreadyInFlight { .. }
                | TradeError::QueueFull { .. }
        )
    }

    /// Whether the outcome of the underlying execution is unknown and must
    /// be reconciled before any re-submission.
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, TradeError::Timeout { .. })
    }
}

impl From<TradeError> for SniperError {
    fn from(err: TradeError) -> Self {
        SniperError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TradeError::RateLimited {
            limit: 10,
            current: 10
        }
        .is_retryable());
        assert!(TradeError::Cooldown { remaining_secs: 60 }.is_retryable());
        assert!(!TradeError::ExecutionFailed("slippage".into()).is_retryable());
        assert!(!TradeError::Timeout { elapsed_ms: 5000 }.is_retryable());
    }

    #[test]
    fn test_timeout_is_unknown_outcome() {
        assert!(TradeError::Timeout { elapsed_ms: 100 }.is_unknown_outcome());
        assert!(!TradeError::ExecutionFailed("reverted".into()).is_unknown_outcome());
    }
}
