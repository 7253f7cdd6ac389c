use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub exit: ExitConfig,
    pub execution: ExecutionConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Quote (SOL) amount spent on each entry
    pub initial_buy_amount: Decimal,
    /// Maximum age of a discovery event before the pool is skipped (ms)
    #[serde(default = "default_max_pool_age_ms")]
    pub max_pool_age_ms: u64,
    /// How long to wait for a first valid price before expiring (seconds)
    #[serde(default = "default_price_wait_timeout_secs")]
    pub price_wait_timeout_secs: u64,
    /// Maximum time a position is monitored before being force-exited (seconds)
    #[serde(default = "default_max_monitor_time_secs")]
    pub max_monitor_time_secs: u64,
    /// Cap on pools simultaneously monitored or trading
    #[serde(default = "default_max_concurrent_monitors")]
    pub max_concurrent_monitors: usize,
    /// Live trading: real execution adapter instead of the paper simulator
    #[serde(default)]
    pub live_trading: bool,
    /// Starting quote balance for the paper book (SOL)
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
}

fn default_max_pool_age_ms() -> u64 {
    5_000
}

fn default_price_wait_timeout_secs() -> u64 {
    30
}

fn default_max_monitor_time_secs() -> u64 {
    300
}

fn default_max_concurrent_monitors() -> usize {
    50
}

fn default_starting_balance() -> Decimal {
    Decimal::TEN
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExitConfig {
    /// Profit fraction that arms the take-profit counter (e.g. 0.10 = +10%)
    pub exit_profit_threshold: Decimal,
    /// Loss fraction that triggers an immediate exit (e.g. -0.10 = -10%)
    pub stop_loss_threshold: Decimal,
    /// Consecutive qualifying samples required before taking profit
    #[serde(default = "default_consecutive_updates")]
    pub consecutive_updates_required: u32,
}

fn default_consecutive_updates() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Trade queue worker count
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Trade queue capacity (submissions waiting for a worker)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Deadline for a single submission, admission to confirmation (ms)
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,
    /// Maximum trades admitted per wall-clock hour
    #[serde(default = "default_max_trades_per_hour")]
    pub max_trades_per_hour: u32,
    /// Cooldown between trades on the same pool (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub per_pool_cooldown_secs: u64,
    /// Maximum acceptable slippage, percent
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: Decimal,
    /// Base URL of the external swap service (live mode)
    #[serde(default)]
    pub swap_service_url: Option<String>,
}

fn default_worker_count() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_submission_timeout_ms() -> u64 {
    30_000
}

fn default_max_trades_per_hour() -> u32 {
    10
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_max_slippage_pct() -> Decimal {
    Decimal::new(5, 0) // 5%
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint publishing pool lifecycle events
    pub ws_url: String,
    /// Initial reconnect delay (seconds); backs off up to the max
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_delay_secs")]
    pub max_reconnect_delay_secs: u64,
}

fn default_reconnect_delay_secs() -> u64 {
    1
}

fn default_max_reconnect_delay_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Persist to PostgreSQL when set; otherwise the in-memory ledger is used
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Also write a rolling log file into this directory
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("execution.worker_count", 2)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SNIPER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SNIPER_FEED__WS_URL, etc.)
            .add_source(
                Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(live_trading: bool, ws_url: &str) -> Self {
        use rust_decimal_macros::dec;

        Self {
            engine: EngineConfig {
                initial_buy_amount: dec!(0.005),
                max_pool_age_ms: 5_000,
                price_wait_timeout_secs: 30,
                max_monitor_time_secs: 300,
                max_concurrent_monitors: 50,
                live_trading,
                starting_balance: dec!(10),
            },
            exit: ExitConfig {
                exit_profit_threshold: dec!(0.10),
                stop_loss_threshold: dec!(-0.10),
                consecutive_updates_required: 3,
            },
            execution: ExecutionConfig {
                worker_count: 2,
                queue_capacity: 64,
                submission_timeout_ms: 30_000,
                max_trades_per_hour: 10,
                per_pool_cooldown_secs: 300,
                max_slippage_pct: dec!(5),
                swap_service_url: None,
            },
            feed: FeedConfig {
                ws_url: ws_url.to_string(),
                reconnect_delay_secs: 1,
                max_reconnect_delay_secs: 30,
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.initial_buy_amount <= Decimal::ZERO {
            errors.push("initial_buy_amount must be positive".to_string());
        }

        if self.engine.starting_balance < self.engine.initial_buy_amount {
            errors.push("starting_balance must cover at least one initial_buy_amount".to_string());
        }

        if self.exit.exit_profit_threshold <= Decimal::ZERO {
            errors.push("exit_profit_threshold must be positive".to_string());
        }

        if self.exit.stop_loss_threshold >= Decimal::ZERO {
            errors.push("stop_loss_threshold must be negative".to_string());
        }

        if self.exit.consecutive_updates_required == 0 {
            errors.push("consecutive_updates_required must be at least 1".to_string());
        }

        if self.engine.max_concurrent_monitors == 0 {
            errors.push("max_concurrent_monitors must be at least 1".to_string());
        }

        if self.execution.worker_count == 0 {
            errors.push("execution.worker_count must be at least 1".to_string());
        }

        if self.execution.max_trades_per_hour == 0 {
            errors.push("max_trades_per_hour must be at least 1".to_string());
        }

        if self.engine.live_trading && self.execution.swap_service_url.is_none() {
            errors.push("live_trading requires execution.swap_service_url".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default_config(false, "ws://localhost:5001/events");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_live_mode_requires_swap_service() {
        let config = AppConfig::default_config(true, "ws://localhost:5001/events");
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("swap_service_url")));
    }

    #[test]
    fn test_threshold_signs_validated() {
        let mut config = AppConfig::default_config(false, "ws://localhost:5001/events");
        config.exit.stop_loss_threshold = dec!(0.10);
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("stop_loss_threshold")));
    }
}
