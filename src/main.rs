use clap::{Parser, Subcommand};
use sniper::config::AppConfig;
use sniper::coordination::{install_signal_handlers, GracefulShutdown};
use sniper::engine::{Engine, PositionBook, TradeQueue};
use sniper::error::{Result, SniperError};
use sniper::execution::{ExecutionAdapter, PaperExecutor, SwapServiceAdapter};
use sniper::feed::WsFeed;
use sniper::ledger::{Ledger, MemoryLedger, PostgresLedger, QUOTE_MINT};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sniper", about = "Solana liquidity-pool sniper", version)]
struct Cli {
    /// Configuration directory (default.toml, <SNIPER_ENV>.toml)
    #[arg(long, default_value = "config", global = true)]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the live event feed
    Run {
        /// Execute real swaps through the configured swap service
        #[arg(long)]
        live: bool,

        /// Override the feed WebSocket URL
        #[arg(long, env = "SNIPER_FEED__WS_URL")]
        ws_url: Option<String>,
    },
    /// Print the portfolio summary from the database ledger
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { live, ws_url } => run(&cli.config_dir, live, ws_url).await,
        Commands::Summary => summary(&cli.config_dir).await,
    }
}

async fn run(config_dir: &str, live: bool, ws_url: Option<String>) -> Result<()> {
    let mut config = load_config(config_dir, ws_url)?;
    if live {
        config.engine.live_trading = true;
    }

    init_logging(&config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {}", e);
        }
        return Err(SniperError::ConfigValidation(errors.join("; ")));
    }

    print_banner(&config);

    // Ledger: Postgres when configured, in-memory otherwise
    let ledger: Arc<dyn Ledger> = match &config.database.url {
        Some(url) => {
            let pg = PostgresLedger::new(url, config.database.max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            info!("no database configured, using in-memory ledger");
            Arc::new(MemoryLedger::new())
        }
    };

    let book = Arc::new(PositionBook::new(
        config.engine.starting_balance,
        Arc::clone(&ledger),
    ));
    ledger
        .upsert_balance(QUOTE_MINT, config.engine.starting_balance)
        .await?;

    let adapter: Arc<dyn ExecutionAdapter> = match (
        config.engine.live_trading,
        &config.execution.swap_service_url,
    ) {
        (true, Some(url)) => {
            info!(swap_service = %url, "LIVE trading mode");
            Arc::new(SwapServiceAdapter::new(url)?)
        }
        (true, None) => {
            // validate() rejects this combination already
            return Err(SniperError::ConfigValidation(
                "live_trading requires execution.swap_service_url".to_string(),
            ));
        }
        (false, _) => {
            info!("PAPER trading mode");
            Arc::new(PaperExecutor::default())
        }
    };

    let queue = TradeQueue::start(&config.execution, adapter, Arc::clone(&book));

    let (feed, events_rx) = WsFeed::new(config.feed.clone());
    tokio::spawn(async move {
        if let Err(e) = feed.run().await {
            error!(error = %e, "feed task failed");
        }
    });

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(Arc::clone(&shutdown)).await;

    let engine = Engine::new(config, queue, Arc::clone(&book), ledger);
    engine.run(events_rx, shutdown.flag()).await?;

    let summary = book.summary().await;
    println!("\nFinal portfolio: {summary}");
    Ok(())
}

async fn summary(config_dir: &str) -> Result<()> {
    let config = load_config(config_dir, None)?;
    init_logging_simple();

    let Some(url) = &config.database.url else {
        return Err(SniperError::ConfigValidation(
            "summary requires database.url".to_string(),
        ));
    };

    let ledger = PostgresLedger::new(url, config.database.max_connections).await?;
    let summary = ledger.portfolio_summary().await?;
    let open = ledger.list_open_positions().await?;

    println!("Portfolio: {summary}");
    if open.is_empty() {
        println!("No open positions");
    } else {
        println!("Open positions:");
        for position in open {
            println!(
                "  {} entry={} base={} held_since={} unrealized={}",
                position.pool_id,
                position.entry_price,
                position.base_amount,
                position.opened_at,
                position.unrealized_pnl()
            );
        }
    }
    Ok(())
}

fn load_config(config_dir: &str, ws_url: Option<String>) -> Result<AppConfig> {
    match AppConfig::load_from(config_dir) {
        Ok(config) => Ok(config),
        Err(e) => {
            if let Some(url) = ws_url {
                warn!(error = %e, "config load failed, using defaults with --ws-url");
                Ok(AppConfig::default_config(false, &url))
            } else {
                Err(e.into())
            }
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sniper=debug,sqlx=warn", config.logging.level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if let Some(directory) = &config.logging.directory {
        let appender = tracing_appender::rolling::daily(directory, "sniper.log");
        if config.logging.json {
            builder.json().with_writer(appender).init();
        } else {
            builder.with_writer(appender).with_ansi(false).init();
        }
        return;
    }

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn print_banner(config: &AppConfig) {
    let mode = if config.engine.live_trading {
        "LIVE TRADING"
    } else {
        "PAPER TRADING"
    };

    println!("\n\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║               SOLANA POOL SNIPER                             ║\x1b[0m");
    println!("\x1b[36m╠══════════════════════════════════════════════════════════════╣\x1b[0m");
    println!(
        "\x1b[36m║\x1b[0m  Mode: {:<54}\x1b[36m║\x1b[0m",
        mode
    );
    println!(
        "\x1b[36m║\x1b[0m  Buy Amount: {:<48}\x1b[36m║\x1b[0m",
        format!("{} SOL", config.engine.initial_buy_amount)
    );
    println!(
        "\x1b[36m║\x1b[0m  Take Profit / Stop Loss: {:<35}\x1b[36m║\x1b[0m",
        format!(
            "{}% / {}%",
            config.exit.exit_profit_threshold * rust_decimal::Decimal::from(100),
            config.exit.stop_loss_threshold * rust_decimal::Decimal::from(100)
        )
    );
    println!(
        "\x1b[36m║\x1b[0m  Max Monitors: {:<46}\x1b[36m║\x1b[0m",
        config.engine.max_concurrent_monitors
    );
    println!(
        "\x1b[36m║\x1b[0m  Rate Limit: {:<48}\x1b[36m║\x1b[0m",
        format!("{} trades/hour", config.execution.max_trades_per_hour)
    );
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m\n");
}
