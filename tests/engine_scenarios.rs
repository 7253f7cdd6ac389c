//! End-to-end engine scenarios driven through an injected feed channel
//! against the paper executor and the in-memory ledger.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sniper::config::AppConfig;
use sniper::engine::{Engine, PositionBook, TradeQueue};
use sniper::execution::{PaperExecConfig, PaperExecutor};
use sniper::feed::FeedEvent;
use sniper::ledger::{Ledger, MemoryLedger};
use sniper::{PoolStatus, PriceSample};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct Harness {
    events: mpsc::Sender<FeedEvent>,
    shutdown: watch::Sender<bool>,
    ledger: Arc<MemoryLedger>,
    book: Arc<PositionBook>,
    handle: tokio::task::JoinHandle<sniper::Result<()>>,
}

impl Harness {
    fn start(mut mutate: impl FnMut(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default_config(false, "ws://localhost:5001/events");
        config.engine.max_pool_age_ms = 5_000;
        config.engine.price_wait_timeout_secs = 2;
        config.execution.submission_timeout_ms = 2_000;
        mutate(&mut config);

        let ledger = Arc::new(MemoryLedger::new());
        let ledger_dyn: Arc<dyn Ledger> = Arc::clone(&ledger) as Arc<dyn Ledger>;
        let book = Arc::new(PositionBook::new(
            config.engine.starting_balance,
            Arc::clone(&ledger_dyn),
        ));
        let adapter = Arc::new(PaperExecutor::new(PaperExecConfig::frictionless()));
        let queue = TradeQueue::start(&config.execution, adapter, Arc::clone(&book));

        let engine = Engine::new(config, queue, Arc::clone(&book), ledger_dyn);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(event_rx, shutdown_rx));

        Self {
            events: event_tx,
            shutdown: shutdown_tx,
            ledger,
            book,
            handle,
        }
    }

    async fn discover(&self, pool_id: &str) {
        self.discover_aged(pool_id, ChronoDuration::zero()).await;
    }

    async fn discover_aged(&self, pool_id: &str, age: ChronoDuration) {
        self.events
            .send(FeedEvent::PoolDiscovered {
                pool_id: pool_id.to_string(),
                base_mint: format!("{pool_id}-base"),
                quote_mint: "So11111111111111111111111111111111111111112".to_string(),
                base_decimals: 9,
                quote_decimals: 9,
                initial_price: None,
                timestamp: Utc::now() - age,
            })
            .await
            .expect("engine alive");
    }

    async fn price(&self, pool_id: &str, value: Decimal) {
        self.price_at(pool_id, value, Utc::now()).await;
    }

    async fn price_at(&self, pool_id: &str, value: Decimal, ts: chrono::DateTime<Utc>) {
        self.events
            .send(FeedEvent::PriceUpdated {
                sample: PriceSample {
                    pool_id: pool_id.to_string(),
                    price: value,
                    base_reserve: dec!(1000000),
                    quote_reserve: dec!(10),
                    timestamp: ts,
                },
            })
            .await
            .expect("engine alive");
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("engine alive");
        self.handle.await.expect("join").expect("engine ok");
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn stale_pool_expires_without_any_trade() {
    let harness = Harness::start(|_| {});

    harness
        .discover_aged("old-pool", ChronoDuration::seconds(60))
        .await;
    settle().await;

    assert_eq!(
        harness.ledger.pool_status("old-pool").await,
        Some(PoolStatus::Expired)
    );
    assert_eq!(harness.ledger.trade_count().await, 0);
    assert!(harness.book.open_position_for("old-pool").await.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn take_profit_fires_on_third_consecutive_sample() {
    let harness = Harness::start(|_| {});

    harness.discover("p1").await;
    harness.price("p1", dec!(0.0000010)).await;
    settle().await;

    let position = harness
        .book
        .open_position_for("p1")
        .await
        .expect("position opened on first price");
    assert_eq!(position.entry_price, dec!(0.0000010));

    // +5% does not arm; the first two +12% samples hold; the third exits.
    harness.price("p1", dec!(0.00000105)).await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_some());

    harness.price("p1", dec!(0.00000112)).await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_some());

    harness.price("p1", dec!(0.00000112)).await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_some());

    harness.price("p1", dec!(0.00000112)).await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_none());

    assert_eq!(
        harness.ledger.pool_status("p1").await,
        Some(PoolStatus::Closed)
    );
    // Entry and exit both recorded, plus a snapshot per accepted sample
    assert_eq!(harness.ledger.trade_count().await, 2);
    assert!(harness.ledger.snapshot_count("p1").await >= 4);

    // Realized profit is positive at +12%
    let summary = harness.book.summary().await;
    assert!(summary.realized_pnl > Decimal::ZERO);

    harness.stop().await;
}

#[tokio::test]
async fn stop_loss_exits_on_first_qualifying_sample() {
    let harness = Harness::start(|_| {});

    harness.discover("p2").await;
    harness.price("p2", dec!(1.0)).await;
    settle().await;
    assert!(harness.book.open_position_for("p2").await.is_some());

    // -15% on the very next sample: immediate exit, no debounce
    harness.price("p2", dec!(0.85)).await;
    settle().await;

    assert!(harness.book.open_position_for("p2").await.is_none());
    let summary = harness.book.summary().await;
    assert!(summary.realized_pnl < Decimal::ZERO);

    harness.stop().await;
}

#[tokio::test]
async fn hourly_rate_limit_caps_entries_at_ten() {
    let harness = Harness::start(|config| {
        config.execution.max_trades_per_hour = 10;
        config.engine.max_concurrent_monitors = 64;
    });

    for i in 0..11 {
        let pool_id = format!("pool-{i}");
        harness.discover(&pool_id).await;
        harness.price(&pool_id, dec!(0.000001)).await;
    }
    tokio::time::sleep(Duration::from_millis(800)).await;

    let mut open = 0;
    for i in 0..11 {
        if harness
            .book
            .open_position_for(&format!("pool-{i}"))
            .await
            .is_some()
        {
            open += 1;
        }
    }
    assert_eq!(open, 10, "the eleventh entry must be rate limited");

    harness.stop().await;
}

#[tokio::test]
async fn at_most_one_open_position_per_pool() {
    let harness = Harness::start(|_| {});

    // Duplicate discovery plus a burst of price updates must produce
    // exactly one entry.
    harness.discover("p1").await;
    harness.discover("p1").await;
    for _ in 0..5 {
        harness.price("p1", dec!(0.000001)).await;
    }
    settle().await;

    assert!(harness.book.open_position_for("p1").await.is_some());
    assert_eq!(harness.ledger.trade_count().await, 1);
    assert_eq!(harness.book.summary().await.open_positions, 1);

    harness.stop().await;
}

#[tokio::test]
async fn out_of_order_samples_never_regress_state() {
    let harness = Harness::start(|_| {});

    harness.discover("p1").await;
    let t0 = Utc::now();
    harness.price_at("p1", dec!(1.0), t0).await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_some());

    // A late sample (timestamp before the entry sample) showing a crash
    // price must be dropped, not trigger the stop-loss.
    harness
        .price_at("p1", dec!(0.10), t0 - ChronoDuration::seconds(5))
        .await;
    settle().await;
    assert!(
        harness.book.open_position_for("p1").await.is_some(),
        "stale sample must not close the position"
    );

    // A fresh crash price does
    harness
        .price_at("p1", dec!(0.10), t0 + ChronoDuration::seconds(1))
        .await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn price_wait_timeout_expires_silent_pool() {
    let harness = Harness::start(|config| {
        config.engine.price_wait_timeout_secs = 1;
    });

    harness.discover("silent").await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert_eq!(
        harness.ledger.pool_status("silent").await,
        Some(PoolStatus::Expired)
    );
    assert_eq!(harness.ledger.trade_count().await, 0);

    harness.stop().await;
}

#[tokio::test]
async fn monitor_cap_expires_overflow_pool() {
    let harness = Harness::start(|config| {
        config.engine.max_concurrent_monitors = 2;
    });

    for id in ["a", "b", "c"] {
        harness.discover(id).await;
        harness.price(id, dec!(0.000001)).await;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Two pools hold the slots; the third expired for capacity
    assert_eq!(
        harness.ledger.pool_status("c").await,
        Some(PoolStatus::Expired)
    );
    assert_eq!(harness.book.summary().await.open_positions, 2);

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_reports_open_positions_and_drains() {
    let harness = Harness::start(|_| {});

    harness.discover("p1").await;
    harness.price("p1", dec!(0.000001)).await;
    settle().await;
    assert!(harness.book.open_position_for("p1").await.is_some());

    // Shutdown with the position still open: drain completes, position
    // remains visible in the book for reporting.
    harness.shutdown.send(true).expect("engine alive");
    let book = Arc::clone(&harness.book);
    harness.handle.await.expect("join").expect("engine ok");

    assert_eq!(book.summary().await.open_positions, 1);
}

#[tokio::test]
async fn randomized_interleavings_keep_one_position_per_pool() {
    use rand::seq::SliceRandom;
    use rand::Rng;

    let harness = Harness::start(|config| {
        config.execution.max_trades_per_hour = 100;
    });

    // Duplicate discoveries and a shuffled burst of price samples for the
    // same pools, sent from several concurrent producers.
    let mut events = Vec::new();
    let base = Utc::now();
    for pool in ["x", "y", "z"] {
        for _ in 0..3 {
            events.push(FeedEvent::PoolDiscovered {
                pool_id: pool.to_string(),
                base_mint: format!("{pool}-base"),
                quote_mint: "SOL".to_string(),
                base_decimals: 9,
                quote_decimals: 9,
                initial_price: None,
                timestamp: base,
            });
        }
        for i in 0..10i64 {
            events.push(FeedEvent::PriceUpdated {
                sample: PriceSample {
                    pool_id: pool.to_string(),
                    price: dec!(0.000001) + Decimal::new(i, 9),
                    base_reserve: dec!(1000000),
                    quote_reserve: dec!(10),
                    timestamp: base + ChronoDuration::milliseconds(i),
                },
            });
        }
    }
    events.shuffle(&mut rand::thread_rng());

    let mut producers = Vec::new();
    for chunk in events.chunks(8) {
        let tx = harness.events.clone();
        let chunk: Vec<FeedEvent> = chunk.to_vec();
        producers.push(tokio::spawn(async move {
            for event in chunk {
                if rand::thread_rng().gen_bool(0.3) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                let _ = tx.send(event).await;
            }
        }));
    }
    for producer in producers {
        producer.await.expect("producer");
    }
    tokio::time::sleep(Duration::from_millis(800)).await;

    // However the events interleaved, each pool entered at most once.
    let summary = harness.book.summary().await;
    assert!(summary.open_positions <= 3);
    assert!(harness.ledger.trade_count().await <= 3);
    for pool in ["x", "y", "z"] {
        let position = harness.book.open_position_for(pool).await;
        if let Some(position) = position {
            assert_eq!(position.pool_id, pool);
        }
    }

    harness.stop().await;
}

#[tokio::test]
async fn balance_never_exceeded_by_concurrent_entries() {
    // Starting balance covers exactly two entries; five pools qualify.
    let harness = Harness::start(|config| {
        config.engine.starting_balance = dec!(0.010);
        config.engine.initial_buy_amount = dec!(0.005);
        config.execution.max_trades_per_hour = 100;
    });

    for i in 0..5 {
        let pool_id = format!("pool-{i}");
        harness.discover(&pool_id).await;
        harness.price(&pool_id, dec!(0.000001)).await;
    }
    tokio::time::sleep(Duration::from_millis(800)).await;

    let summary = harness.book.summary().await;
    assert_eq!(summary.open_positions, 2);
    assert!(summary.balance >= Decimal::ZERO);

    harness.stop().await;
}
