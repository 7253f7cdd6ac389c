//! Top-level coordinator.
//!
//! Owns the pool map as single-writer state: every lifecycle event, entry
//! outcome, and monitor report is applied inside the run loop, so pool
//! status transitions are serialized by construction. Per-pool price
//! delivery goes through each pool's sample channel into its monitor task,
//! and entry submissions run on spawned tasks so a slow execution never
//! stalls event processing.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::{
    ExpiryReason, Pool, PoolStatus, PriceSample, Trade, TradeRequest,
};
use crate::error::{Result, TradeError};
use crate::feed::FeedEvent;
use crate::ledger::Ledger;

use super::book::PositionBook;
use super::exit::ExitEvaluator;
use super::limits::MonitorSlots;
use super::monitor::{MonitorExit, MonitorReport, PoolMonitor};
use super::queue::TradeQueue;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const STATS_INTERVAL: Duration = Duration::from_secs(60);
const SAMPLE_CHANNEL_CAPACITY: usize = 64;
const MONITOR_REPORT_CAPACITY: usize = 64;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-pool bookkeeping owned by the run loop
struct PoolEntry {
    pool: Pool,
    /// Timestamp watermark; samples at or before this are dropped
    last_sample_at: Option<DateTime<Utc>>,
    /// When the price wait started (PendingPrice only)
    pending_since: Instant,
    /// An entry submission is on a worker right now
    entry_pending: bool,
    /// This pool holds one of the bounded monitor slots
    holds_slot: bool,
    /// Sample channel into the pool's monitor (Trading only)
    sample_tx: Option<mpsc::Sender<PriceSample>>,
}

struct EntryOutcome {
    pool_id: String,
    result: std::result::Result<Trade, TradeError>,
}

/// Pool lifecycle coordinator
pub struct Engine {
    config: AppConfig,
    queue: Arc<TradeQueue>,
    book: Arc<PositionBook>,
    ledger: Arc<dyn Ledger>,
    slots: MonitorSlots,
    evaluator: ExitEvaluator,
    pools: HashMap<String, PoolEntry>,
    /// Every pool id ever observed; duplicate discoveries are no-ops even
    /// after the live entry is cleaned up
    seen: HashSet<String>,
    monitor_shutdown: watch::Sender<bool>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        queue: Arc<TradeQueue>,
        book: Arc<PositionBook>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let slots = MonitorSlots::new(config.engine.max_concurrent_monitors);
        let evaluator = ExitEvaluator::new(&config.exit);
        let (monitor_shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            book,
            ledger,
            slots,
            evaluator,
            pools: HashMap::new(),
            seen: HashSet::new(),
            monitor_shutdown,
        }
    }

    /// Process feed events until the stream ends or shutdown is requested.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let (report_tx, mut reports) = mpsc::channel::<MonitorReport>(MONITOR_REPORT_CAPACITY);
        let (entry_tx, mut entries) = mpsc::channel::<EntryOutcome>(MONITOR_REPORT_CAPACITY);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut stats = tokio::time::interval(STATS_INTERVAL);

        info!(
            max_monitors = self.config.engine.max_concurrent_monitors,
            live = self.config.engine.live_trading,
            "engine started"
        );

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event, &entry_tx).await,
                        None => {
                            warn!("feed channel closed, engine stopping");
                            break;
                        }
                    }
                }
                Some(outcome) = entries.recv() => {
                    self.handle_entry_outcome(outcome, &report_tx).await;
                }
                Some(report) = reports.recv() => {
                    self.handle_monitor_report(report).await;
                }
                _ = sweep.tick() => {
                    self.sweep_price_waits().await;
                }
                _ = stats.tick() => {
                    self.log_stats().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, engine stopping");
                        break;
                    }
                }
            }
        }

        self.shutdown_sequence().await;
        Ok(())
    }

    async fn handle_event(&mut self, event: FeedEvent, entry_tx: &mpsc::Sender<EntryOutcome>) {
        match event {
            FeedEvent::PoolDiscovered {
                pool_id,
                base_mint,
                quote_mint,
                base_decimals,
                quote_decimals,
                initial_price: _,
                timestamp,
            } => {
                if pool_id.is_empty() {
                    warn!("discovery event without pool id dropped");
                    return;
                }
                if self.seen.contains(&pool_id) {
                    debug!(%pool_id, "duplicate discovery ignored");
                    return;
                }
                self.seen.insert(pool_id.clone());

                let mut pool = Pool::new(
                    pool_id.clone(),
                    base_mint,
                    quote_mint,
                    base_decimals,
                    quote_decimals,
                    timestamp,
                );

                let age_ms = pool.age_ms(Utc::now());
                if age_ms > self.config.engine.max_pool_age_ms {
                    info!(
                        %pool_id,
                        age_ms,
                        reason = %ExpiryReason::TooOld,
                        "pool too old at discovery, expiring"
                    );
                    pool.status = PoolStatus::Expired;
                    self.record_pool(&pool).await;
                    return;
                }

                pool.status = PoolStatus::PendingPrice;
                info!(
                    %pool_id,
                    base_mint = %pool.base_mint,
                    quote_mint = %pool.quote_mint,
                    age_ms,
                    "new pool discovered, waiting for price"
                );
                self.record_pool(&pool).await;
                self.pools.insert(
                    pool_id,
                    PoolEntry {
                        pool,
                        last_sample_at: None,
                        pending_since: Instant::now(),
                        entry_pending: false,
                        holds_slot: false,
                        sample_tx: None,
                    },
                );
            }

            FeedEvent::PoolReady { pool_id, timestamp } => {
                // Readiness is informational here: entry is gated on the
                // first valid price, which also covers pools whose ready
                // event is lost or arrives out of order.
                if self.pools.contains_key(&pool_id) {
                    debug!(%pool_id, %timestamp, "pool ready");
                } else {
                    debug!(%pool_id, "ready event for unknown pool ignored");
                }
            }

            FeedEvent::PriceUpdated { sample } => {
                self.handle_sample(sample, entry_tx).await;
            }
        }
    }

    async fn handle_sample(&mut self, sample: PriceSample, entry_tx: &mpsc::Sender<EntryOutcome>) {
        if !sample.is_valid() {
            debug!(pool_id = %sample.pool_id, price = %sample.price, "non-positive price dropped");
            return;
        }

        let Some(entry) = self.pools.get_mut(&sample.pool_id) else {
            // Updates for pools we never tracked (or already finished) are
            // expected noise from the at-least-once feed.
            return;
        };

        // Enforce per-pool non-decreasing timestamps; late or duplicate
        // samples never regress state.
        if let Some(watermark) = entry.last_sample_at {
            if sample.timestamp <= watermark {
                debug!(
                    pool_id = %sample.pool_id,
                    sample_ts = %sample.timestamp,
                    %watermark,
                    "stale sample dropped"
                );
                return;
            }
        }
        entry.last_sample_at = Some(sample.timestamp);

        if let Err(e) = self.ledger.record_snapshot(&sample).await {
            warn!(pool_id = %sample.pool_id, error = %e, "snapshot write failed");
        }

        let Some(entry) = self.pools.get_mut(&sample.pool_id) else {
            return;
        };

        match entry.pool.status {
            PoolStatus::PendingPrice => {
                if !self.slots.try_acquire() {
                    warn!(
                        pool_id = %sample.pool_id,
                        active = self.slots.active(),
                        "no monitor slot free, expiring pool"
                    );
                    self.expire_pool(&sample.pool_id, ExpiryReason::Capacity).await;
                    return;
                }
                let Some(entry) = self.pools.get_mut(&sample.pool_id) else {
                    self.slots.release();
                    return;
                };
                entry.holds_slot = true;
                Self::transition(&mut entry.pool, PoolStatus::Monitoring);
                let pool_id = sample.pool_id.clone();
                self.persist_status(&pool_id, PoolStatus::Monitoring).await;
                self.submit_entry(&pool_id, sample.price, entry_tx);
            }
            PoolStatus::Monitoring => {
                // A previous entry attempt was deferred (rate limit,
                // cooldown, queue pressure); try again on this sample.
                if !entry.entry_pending {
                    self.submit_entry(&sample.pool_id, sample.price, entry_tx);
                }
            }
            PoolStatus::Trading => {
                if let Some(tx) = &entry.sample_tx {
                    if tx.try_send(sample.clone()).is_err() {
                        debug!(pool_id = %sample.pool_id, "monitor busy, sample dropped");
                    }
                }
            }
            _ => {}
        }
    }

    /// Fire the entry submission on its own task; the result comes back
    /// through the entries channel.
    fn submit_entry(
        &mut self,
        pool_id: &str,
        reference_price: rust_decimal::Decimal,
        entry_tx: &mpsc::Sender<EntryOutcome>,
    ) {
        let Some(entry) = self.pools.get_mut(pool_id) else {
            return;
        };
        entry.entry_pending = true;

        let pool = entry.pool.clone();
        let request = TradeRequest::buy(
            pool_id.to_string(),
            self.config.engine.initial_buy_amount,
            self.config.execution.max_slippage_pct,
        )
        .with_deadline(Duration::from_millis(
            self.config.execution.submission_timeout_ms,
        ));

        let queue = Arc::clone(&self.queue);
        let entry_tx = entry_tx.clone();
        let pool_id = pool_id.to_string();
        tokio::spawn(async move {
            let result = queue.submit(&pool, request, reference_price).await;
            let _ = entry_tx.send(EntryOutcome { pool_id, result }).await;
        });
    }

    async fn handle_entry_outcome(
        &mut self,
        outcome: EntryOutcome,
        report_tx: &mpsc::Sender<MonitorReport>,
    ) {
        let EntryOutcome { pool_id, result } = outcome;

        let Some(entry) = self.pools.get_mut(&pool_id) else {
            // Pool was swept while the submission ran (e.g. shutdown).
            if let Ok(trade) = &result {
                warn!(%pool_id, signature = %trade.signature, "entry confirmed for removed pool");
            }
            return;
        };
        entry.entry_pending = false;

        match result {
            Ok(trade) => {
                info!(
                    %pool_id,
                    signature = %trade.signature,
                    price = %trade.price,
                    base_amount = %trade.base_amount,
                    quote_amount = %trade.quote_amount,
                    "entry confirmed, position open"
                );
                Self::transition(&mut entry.pool, PoolStatus::Trading);
                self.persist_status(&pool_id, PoolStatus::Trading).await;
                self.spawn_monitor(&pool_id, report_tx).await;
            }
            Err(e) if e.is_retryable() => {
                // Pool stays in Monitoring; the next valid sample retries.
                debug!(%pool_id, error = %e, "entry deferred");
            }
            Err(TradeError::Timeout { elapsed_ms }) => {
                // Unknown outcome: never auto-resubmitted. If the fill lands
                // late the book records the exposure and reporting flags it.
                warn!(%pool_id, elapsed_ms, "entry outcome unknown, expiring pool");
                self.expire_pool(&pool_id, ExpiryReason::EntryTimeout).await;
            }
            Err(TradeError::LedgerWrite(reason)) => {
                // The fill confirmed; only durable persistence failed. The
                // in-memory book stays authoritative, so if it holds the
                // position the exposure keeps its monitor.
                error!(%pool_id, %reason, "ledger write failed after confirmed entry");
                if self.book.open_position_for(&pool_id).await.is_some() {
                    if let Some(entry) = self.pools.get_mut(&pool_id) {
                        Self::transition(&mut entry.pool, PoolStatus::Trading);
                    }
                    self.persist_status(&pool_id, PoolStatus::Trading).await;
                    self.spawn_monitor(&pool_id, report_tx).await;
                } else {
                    self.expire_pool(&pool_id, ExpiryReason::EntryFailed).await;
                }
            }
            Err(TradeError::Shutdown) => {
                debug!(%pool_id, "entry rejected during shutdown");
            }
            Err(e) => {
                warn!(%pool_id, error = %e, "entry failed, expiring pool");
                self.expire_pool(&pool_id, ExpiryReason::EntryFailed).await;
            }
        }
    }

    async fn spawn_monitor(&mut self, pool_id: &str, report_tx: &mpsc::Sender<MonitorReport>) {
        let Some(position) = self.book.open_position_for(pool_id).await else {
            error!(%pool_id, "no open position after confirmed entry");
            return;
        };
        let Some(entry) = self.pools.get_mut(pool_id) else {
            return;
        };

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        entry.sample_tx = Some(sample_tx);

        let monitor = PoolMonitor::new(
            entry.pool.clone(),
            position,
            self.evaluator.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.book),
            Duration::from_secs(self.config.engine.max_monitor_time_secs),
            Duration::from_millis(self.config.execution.submission_timeout_ms),
        );

        let shutdown_rx = self.monitor_shutdown.subscribe();
        let report_tx = report_tx.clone();
        tokio::spawn(monitor.run(sample_rx, shutdown_rx, report_tx));
    }

    async fn handle_monitor_report(&mut self, report: MonitorReport) {
        let pool_id = report.pool_id;
        match report.exit {
            MonitorExit::Closed {
                reason,
                realized_pnl,
            } => {
                info!(%pool_id, %reason, %realized_pnl, "pool closed");
                if let Some(entry) = self.pools.get_mut(&pool_id) {
                    Self::transition(&mut entry.pool, PoolStatus::Closed);
                }
                self.persist_status(&pool_id, PoolStatus::Closed).await;
                self.remove_pool(&pool_id);
            }
            MonitorExit::Abandoned { error } => {
                // Position is still open; keep it visible, close the pool's
                // monitoring lifecycle so the slot frees up.
                error!(%pool_id, %error, "forced exit failed, open position left in book");
                if let Some(entry) = self.pools.get_mut(&pool_id) {
                    Self::transition(&mut entry.pool, PoolStatus::Closed);
                }
                self.persist_status(&pool_id, PoolStatus::Closed).await;
                self.remove_pool(&pool_id);
            }
            MonitorExit::Stopped => {
                debug!(%pool_id, "monitor stopped");
                self.remove_pool(&pool_id);
            }
        }
    }

    /// Expire PendingPrice pools whose wait window has elapsed.
    async fn sweep_price_waits(&mut self) {
        let timeout = Duration::from_secs(self.config.engine.price_wait_timeout_secs);
        let expired: Vec<String> = self
            .pools
            .iter()
            .filter(|(_, e)| {
                e.pool.status == PoolStatus::PendingPrice && e.pending_since.elapsed() > timeout
            })
            .map(|(id, _)| id.clone())
            .collect();

        for pool_id in expired {
            info!(%pool_id, "no price within wait window, expiring");
            self.expire_pool(&pool_id, ExpiryReason::NoPrice).await;
        }
    }

    async fn expire_pool(&mut self, pool_id: &str, reason: ExpiryReason) {
        if let Some(entry) = self.pools.get_mut(pool_id) {
            Self::transition(&mut entry.pool, PoolStatus::Expired);
        }
        debug!(%pool_id, %reason, "pool expired");
        self.persist_status(pool_id, PoolStatus::Expired).await;
        self.remove_pool(pool_id);
    }

    /// Drop the live entry for a terminal pool, releasing its slot and
    /// closing its sample channel. The id stays in `seen` so duplicate
    /// discoveries remain no-ops.
    fn remove_pool(&mut self, pool_id: &str) {
        if let Some(entry) = self.pools.remove(pool_id) {
            if entry.holds_slot {
                self.slots.release();
            }
        }
    }

    fn transition(pool: &mut Pool, to: PoolStatus) {
        if !pool.status.can_transition_to(to) {
            // Forward-only lifecycle; a bad edge here is an engine bug.
            error!(
                pool_id = %pool.pool_id,
                from = %pool.status,
                %to,
                "invalid pool transition suppressed"
            );
            return;
        }
        pool.status = to;
    }

    async fn record_pool(&self, pool: &Pool) {
        if let Err(e) = self.ledger.record_pool(pool).await {
            warn!(pool_id = %pool.pool_id, error = %e, "pool record failed");
        }
    }

    async fn persist_status(&self, pool_id: &str, status: PoolStatus) {
        if let Err(e) = self.ledger.update_pool_status(pool_id, status).await {
            warn!(%pool_id, %status, error = %e, "pool status write failed");
        }
    }

    async fn log_stats(&self) {
        let summary = self.book.summary().await;
        let queue = self.queue.stats();
        info!(
            tracked_pools = self.pools.len(),
            active_monitors = self.slots.active(),
            max_monitors = self.slots.capacity(),
            balance = %summary.balance,
            open_positions = summary.open_positions,
            total_trades = summary.total_trades,
            unrealized_pnl = %summary.unrealized_pnl,
            realized_pnl = %summary.realized_pnl,
            queue_pending = queue.pending,
            queue_confirmed = queue.confirmed,
            queue_rejected = queue.rejected,
            "engine stats"
        );
    }

    /// Cooperative shutdown: stop intake, signal monitors, drain the queue,
    /// and report anything left behind.
    async fn shutdown_sequence(&mut self) {
        self.queue.stop_intake();
        let _ = self.monitor_shutdown.send(true);

        let outstanding = self.queue.drain(DRAIN_TIMEOUT).await;
        if outstanding > 0 {
            error!(outstanding, "submissions still queued or in flight at shutdown");
        }

        let open = self.book.summary().await;
        if open.open_positions > 0 {
            warn!(
                open_positions = open.open_positions,
                unrealized_pnl = %open.unrealized_pnl,
                "open positions left at shutdown"
            );
        }

        info!(summary = %open, "engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{PaperExecConfig, PaperExecutor};
    use crate::ledger::MemoryLedger;
    use rust_decimal_macros::dec;

    fn test_app_config() -> AppConfig {
        let mut config = AppConfig::default_config(false, "ws://localhost:5001/events");
        config.engine.max_pool_age_ms = 5_000;
        config.engine.price_wait_timeout_secs = 1;
        config.execution.submission_timeout_ms = 2_000;
        config
    }

    struct TestHarness {
        events: mpsc::Sender<FeedEvent>,
        shutdown: watch::Sender<bool>,
        ledger: Arc<MemoryLedger>,
        book: Arc<PositionBook>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn start_engine(config: AppConfig) -> TestHarness {
        let ledger = Arc::new(MemoryLedger::new());
        let ledger_dyn: Arc<dyn Ledger> = Arc::clone(&ledger) as Arc<dyn Ledger>;
        let book = Arc::new(PositionBook::new(
            config.engine.starting_balance,
            Arc::clone(&ledger_dyn),
        ));
        let adapter = Arc::new(PaperExecutor::new(PaperExecConfig::frictionless()));
        let queue = TradeQueue::start(&config.execution, adapter, Arc::clone(&book));

        let engine = Engine::new(config, queue, Arc::clone(&book), ledger_dyn);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(event_rx, shutdown_rx));

        TestHarness {
            events: event_tx,
            shutdown: shutdown_tx,
            ledger,
            book,
            handle,
        }
    }

    fn discovery(pool_id: &str, age: chrono::Duration) -> FeedEvent {
        FeedEvent::PoolDiscovered {
            pool_id: pool_id.to_string(),
            base_mint: format!("{pool_id}-base"),
            quote_mint: "SOL".to_string(),
            base_decimals: 9,
            quote_decimals: 9,
            initial_price: None,
            timestamp: Utc::now() - age,
        }
    }

    fn price(pool_id: &str, value: rust_decimal::Decimal) -> FeedEvent {
        FeedEvent::PriceUpdated {
            sample: PriceSample {
                pool_id: pool_id.to_string(),
                price: value,
                base_reserve: dec!(1000000),
                quote_reserve: dec!(10),
                timestamp: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_stale_pool_expires_without_trading() {
        let harness = start_engine(test_app_config());

        harness
            .events
            .send(discovery("old-pool", chrono::Duration::seconds(30)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            harness.ledger.pool_status("old-pool").await,
            Some(PoolStatus::Expired)
        );
        assert_eq!(harness.ledger.trade_count().await, 0);

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fresh_pool_enters_on_first_price() {
        let harness = start_engine(test_app_config());

        harness
            .events
            .send(discovery("p1", chrono::Duration::zero()))
            .await
            .unwrap();
        harness.events.send(price("p1", dec!(0.000001))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(harness.book.open_position_for("p1").await.is_some());
        assert_eq!(
            harness.ledger.pool_status("p1").await,
            Some(PoolStatus::Trading)
        );

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_discovery_is_noop() {
        let harness = start_engine(test_app_config());

        harness
            .events
            .send(discovery("p1", chrono::Duration::zero()))
            .await
            .unwrap();
        harness
            .events
            .send(discovery("p1", chrono::Duration::zero()))
            .await
            .unwrap();
        harness.events.send(price("p1", dec!(0.000001))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // One discovery, one entry
        assert_eq!(harness.ledger.trade_count().await, 1);

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_price_wait_timeout_expires_pool() {
        let harness = start_engine(test_app_config());

        harness
            .events
            .send(discovery("silent", chrono::Duration::zero()))
            .await
            .unwrap();
        // price_wait_timeout_secs = 1; sweep runs every second
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(
            harness.ledger.pool_status("silent").await,
            Some(PoolStatus::Expired)
        );

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_full_lifecycle_take_profit() {
        let harness = start_engine(test_app_config());

        harness
            .events
            .send(discovery("p1", chrono::Duration::zero()))
            .await
            .unwrap();
        harness.events.send(price("p1", dec!(0.0000010))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(harness.book.open_position_for("p1").await.is_some());

        // +5%, then three +12% samples: exit on the third
        for value in [
            dec!(0.00000105),
            dec!(0.00000112),
            dec!(0.00000112),
            dec!(0.00000112),
        ] {
            harness.events.send(price("p1", value)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(harness.book.open_position_for("p1").await.is_none());
        assert_eq!(
            harness.ledger.pool_status("p1").await,
            Some(PoolStatus::Closed)
        );
        // Entry + exit recorded
        assert_eq!(harness.ledger.trade_count().await, 2);

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
    }
}
