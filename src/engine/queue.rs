//! Bounded, ordered trade execution pipeline.
//!
//! A single logical FIFO queue drained by a small worker pool. Admission
//! enforces the per-pool cooldown, the hourly rate limit, a single in-flight
//! submission per pool, and the queue capacity; execution enforces the
//! submission deadline. Ledger and book side effects happen only after the
//! adapter confirms, exactly once per signature.
//!
//! A caller whose deadline elapses gets `TradeError::Timeout` while the
//! worker rides the adapter call to completion: an in-flight swap is never
//! abandoned, and a late confirmation is still applied to the book so real
//! exposure is never lost.

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::domain::{Pool, Sizing, Trade, TradeRequest, TradeSide, TradeStatus};
use crate::error::TradeError;
use crate::execution::{BuyOrder, ExecutionAdapter, SellOrder, TradeFill};

use super::book::PositionBook;
use super::limits::HourlyRateLimiter;

struct Submission {
    pool: Pool,
    request: TradeRequest,
    reference_price: Decimal,
    admitted_at: Instant,
    respond: oneshot::Sender<Result<Trade, TradeError>>,
}

/// Queue counters for the periodic stats line
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub submitted: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub pending: usize,
    pub in_flight: usize,
}

/// State shared between the queue handle and its workers. Workers own only
/// this, so dropping the `TradeQueue` closes the channel and lets them exit.
struct QueueShared {
    cooldown: Duration,
    /// Pools with a submission somewhere between admission and completion
    in_flight: DashMap<String, Instant>,
    /// Last confirmed entry per pool (cooldown stamp)
    last_entry: DashMap<String, Instant>,
    pending: AtomicUsize,
    submitted: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// FIFO trade queue with bounded worker concurrency
pub struct TradeQueue {
    tx: mpsc::Sender<Submission>,
    capacity: usize,
    max_slippage_pct: Decimal,
    rate_limiter: HourlyRateLimiter,
    accepting: AtomicBool,
    shared: Arc<QueueShared>,
}

impl TradeQueue {
    /// Create the queue and spawn its workers
    pub fn start(
        config: &ExecutionConfig,
        adapter: Arc<dyn ExecutionAdapter>,
        book: Arc<PositionBook>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Submission>(config.queue_capacity);

        let shared = Arc::new(QueueShared {
            cooldown: Duration::from_secs(config.per_pool_cooldown_secs),
            in_flight: DashMap::new(),
            last_entry: DashMap::new(),
            pending: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        let worker_count = config.worker_count.max(1);
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let adapter = Arc::clone(&adapter);
            let book = Arc::clone(&book);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                worker_loop(worker_id, rx, shared, adapter, book).await;
            });
        }

        info!(
            workers = worker_count,
            capacity = config.queue_capacity,
            "trade queue started"
        );

        Arc::new(Self {
            tx,
            capacity: config.queue_capacity,
            max_slippage_pct: config.max_slippage_pct,
            rate_limiter: HourlyRateLimiter::new(config.max_trades_per_hour),
            accepting: AtomicBool::new(true),
            shared,
        })
    }

    /// Default slippage bound applied to requests built by the engine
    pub fn max_slippage_pct(&self) -> Decimal {
        self.max_slippage_pct
    }

    /// Submit a request and wait for its outcome.
    ///
    /// Returns a structured `TradeError` on rejection; `Timeout` means the
    /// outcome is unknown and the pool stays in-flight until the adapter
    /// call resolves.
    pub async fn submit(
        &self,
        pool: &Pool,
        request: TradeRequest,
        reference_price: Decimal,
    ) -> Result<Trade, TradeError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TradeError::Shutdown);
        }

        // Cooldown applies to entries: one buy per pool per window.
        if request.side == TradeSide::Buy {
            if let Some(stamp) = self.shared.last_entry.get(&pool.pool_id) {
                let elapsed = stamp.elapsed();
                if elapsed < self.shared.cooldown {
                    self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(TradeError::Cooldown {
                        remaining_secs: (self.shared.cooldown - elapsed).as_secs(),
                    });
                }
            }
        }

        // One submission per pool between admission and completion. The
        // loser of a concurrent insert is rejected; the winner's entry is
        // removed by the worker when the submission completes.
        if self
            .shared
            .in_flight
            .insert(pool.pool_id.clone(), Instant::now())
            .is_some()
        {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(TradeError::AlreadyInFlight {
                pool_id: pool.pool_id.clone(),
            });
        }

        // Reserve a queue slot before burning rate budget.
        let permit = match self.tx.try_reserve() {
            Ok(permit) => permit,
            Err(_) => {
                self.shared.in_flight.remove(&pool.pool_id);
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(TradeError::QueueFull {
                    capacity: self.capacity,
                });
            }
        };

        // Exits never compete with entries for the hourly budget; an open
        // position must always be able to leave.
        if request.side == TradeSide::Buy {
            if let Err(current) = self.rate_limiter.try_acquire() {
                self.shared.in_flight.remove(&pool.pool_id);
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(TradeError::RateLimited {
                    limit: self.rate_limiter.limit(),
                    current,
                });
            }
        }

        let deadline = request.deadline;
        let (respond, rx) = oneshot::channel();
        let submission = Submission {
            pool: pool.clone(),
            request,
            reference_price,
            admitted_at: Instant::now(),
            respond,
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        permit.send(submission);

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Worker dropped the responder without sending; treat as an
                // execution failure (never silent).
                Err(TradeError::ExecutionFailed(
                    "executor dropped submission".to_string(),
                ))
            }
            Err(_) => Err(TradeError::Timeout {
                elapsed_ms: deadline.as_millis() as u64,
            }),
        }
    }

    /// Stop admitting new submissions
    pub fn stop_intake(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("trade queue intake stopped");
    }

    /// Drain outstanding work, waiting up to `timeout`.
    ///
    /// Returns the number of submissions still queued or in flight after the
    /// wait; a non-zero count is reported, never silently discarded.
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.stop_intake();
        let deadline = Instant::now() + timeout;

        loop {
            let outstanding =
                self.shared.pending.load(Ordering::SeqCst) + self.shared.in_flight.len();
            if outstanding == 0 {
                info!("trade queue drained");
                return 0;
            }
            if Instant::now() >= deadline {
                warn!(
                    outstanding,
                    "trade queue drain timed out with work outstanding"
                );
                return outstanding;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            confirmed: self.shared.confirmed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            pending: self.shared.pending.load(Ordering::SeqCst),
            in_flight: self.shared.in_flight.len(),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Submission>>>,
    shared: Arc<QueueShared>,
    adapter: Arc<dyn ExecutionAdapter>,
    book: Arc<PositionBook>,
) {
    debug!(worker_id, "trade worker started");

    loop {
        let submission = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(submission) = submission else {
            debug!(worker_id, "trade worker stopping, queue closed");
            return;
        };

        shared.pending.fetch_sub(1, Ordering::SeqCst);
        let pool_id = submission.pool.pool_id.clone();
        process(&shared, submission, adapter.as_ref(), &book).await;
        shared.in_flight.remove(&pool_id);
    }
}

async fn process(
    shared: &QueueShared,
    submission: Submission,
    adapter: &dyn ExecutionAdapter,
    book: &PositionBook,
) {
    let Submission {
        pool,
        request,
        reference_price,
        admitted_at,
        respond,
    } = submission;

    // A submission that aged past its deadline while queued never started
    // executing; fail it without touching the adapter.
    if admitted_at.elapsed() >= request.deadline {
        shared.failed.fetch_add(1, Ordering::Relaxed);
        let _ = respond.send(Err(TradeError::Timeout {
            elapsed_ms: admitted_at.elapsed().as_millis() as u64,
        }));
        return;
    }

    let outcome = match request.side {
        TradeSide::Buy => execute_buy(&pool, &request, reference_price, adapter, book).await,
        TradeSide::Sell => execute_sell(&pool, &request, reference_price, adapter, book).await,
    };

    match &outcome {
        Ok(trade) => {
            shared.confirmed.fetch_add(1, Ordering::Relaxed);
            if trade.side == TradeSide::Buy {
                shared
                    .last_entry
                    .insert(pool.pool_id.clone(), Instant::now());
            }
        }
        Err(_) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    if respond.send(outcome).is_err() {
        // Caller timed out waiting. The fill (if any) was already applied to
        // the book above, so exposure is tracked; flag it for reconciliation.
        warn!(
            pool_id = %pool.pool_id,
            side = %request.side,
            "submission outcome resolved after caller deadline"
        );
    }
}

async fn execute_buy(
    pool: &Pool,
    request: &TradeRequest,
    reference_price: Decimal,
    adapter: &dyn ExecutionAdapter,
    book: &PositionBook,
) -> Result<Trade, TradeError> {
    let quote_amount = match request.sizing {
        Sizing::QuoteAmount(amount) => amount,
        Sizing::PositionPct(_) => {
            return Err(TradeError::ExecutionFailed(
                "buy submissions are sized in quote units".to_string(),
            ))
        }
    };

    // Check funds before touching the adapter; the book re-checks under its
    // lock before the debit is applied.
    let available = book.quote_balance().await;
    if available < quote_amount {
        return Err(TradeError::InsufficientBalance {
            required: quote_amount,
            available,
        });
    }

    let order = BuyOrder {
        pool_id: pool.pool_id.clone(),
        quote_amount,
        max_slippage_pct: request.max_slippage_pct,
        reference_price,
    };

    let fill = adapter
        .buy(&order)
        .await
        .map_err(|e| TradeError::ExecutionFailed(e.to_string()))?;

    book.open_position(pool, &fill).await?;
    Ok(trade_from_fill(pool, TradeSide::Buy, &fill))
}

async fn execute_sell(
    pool: &Pool,
    request: &TradeRequest,
    reference_price: Decimal,
    adapter: &dyn ExecutionAdapter,
    book: &PositionBook,
) -> Result<Trade, TradeError> {
    let position_pct = match request.sizing {
        Sizing::PositionPct(pct) => pct,
        Sizing::QuoteAmount(_) => {
            return Err(TradeError::ExecutionFailed(
                "sell submissions are sized as a position percentage".to_string(),
            ))
        }
    };

    let position = book
        .open_position_for(&pool.pool_id)
        .await
        .ok_or_else(|| TradeError::NoOpenPosition {
            pool_id: pool.pool_id.clone(),
        })?;

    let base_amount = position.base_amount * position_pct / dec!(100);
    let order = SellOrder {
        pool_id: pool.pool_id.clone(),
        base_amount,
        position_pct,
        max_slippage_pct: request.max_slippage_pct,
        reference_price,
    };

    let fill = adapter
        .sell(&order)
        .await
        .map_err(|e| TradeError::ExecutionFailed(e.to_string()))?;

    book.close_position(pool, &fill).await?;
    Ok(trade_from_fill(pool, TradeSide::Sell, &fill))
}

fn trade_from_fill(pool: &Pool, side: TradeSide, fill: &TradeFill) -> Trade {
    Trade {
        signature: fill.signature.clone(),
        pool_id: pool.pool_id.clone(),
        side,
        base_amount: fill.base_amount,
        quote_amount: fill.quote_amount,
        price: fill.price,
        timestamp: fill.timestamp,
        status: TradeStatus::Confirmed,
    }
}
