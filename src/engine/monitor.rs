//! Per-pool monitor task.
//!
//! Spawned when a buy confirms and a position opens; destroyed when the
//! position closes, the monitoring window ends, or the engine shuts down.
//! The monitor is the single owner of the position's debounce state: price
//! samples arrive serialized through the pool's channel, so no lock is
//! needed around evaluation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{Pool, Position, PriceSample, TradeRequest};
use crate::error::TradeError;

use super::book::PositionBook;
use super::exit::{ExitDecision, ExitEvaluator, ExitReason};
use super::queue::TradeQueue;

const FORCED_EXIT_ATTEMPTS: u32 = 3;
const FORCED_EXIT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How a monitor ended, reported back to the engine
#[derive(Debug)]
pub enum MonitorExit {
    /// Position closed by a confirmed sell
    Closed {
        reason: ExitReason,
        realized_pnl: Decimal,
    },
    /// Forced exit at the monitoring deadline could not be executed; the
    /// position is still open in the book and needs operator attention
    Abandoned { error: TradeError },
    /// Engine shutdown or channel teardown before an exit; position open
    Stopped,
}

/// Message from a finished monitor to the engine loop
#[derive(Debug)]
pub struct MonitorReport {
    pub pool_id: String,
    pub exit: MonitorExit,
}

pub struct PoolMonitor {
    pool: Pool,
    position: Position,
    evaluator: ExitEvaluator,
    queue: Arc<TradeQueue>,
    book: Arc<PositionBook>,
    max_monitor_time: Duration,
    submission_deadline: Duration,
}

impl PoolMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Pool,
        position: Position,
        evaluator: ExitEvaluator,
        queue: Arc<TradeQueue>,
        book: Arc<PositionBook>,
        max_monitor_time: Duration,
        submission_deadline: Duration,
    ) -> Self {
        Self {
            pool,
            position,
            evaluator,
            queue,
            book,
            max_monitor_time,
            submission_deadline,
        }
    }

    /// Run until the position exits, the window elapses, or shutdown.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<PriceSample>,
        mut shutdown: watch::Receiver<bool>,
        reports: mpsc::Sender<MonitorReport>,
    ) {
        let pool_id = self.pool.pool_id.clone();
        let deadline = Instant::now() + self.max_monitor_time;

        info!(
            %pool_id,
            entry_price = %self.position.entry_price,
            window_secs = self.max_monitor_time.as_secs(),
            "monitoring position"
        );

        let exit = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    info!(%pool_id, "monitoring window elapsed, forcing exit");
                    break self.force_exit().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(%pool_id, "monitor stopping on shutdown");
                        break MonitorExit::Stopped;
                    }
                }
                maybe_sample = samples.recv() => {
                    let Some(sample) = maybe_sample else {
                        debug!(%pool_id, "sample channel closed, monitor stopping");
                        break MonitorExit::Stopped;
                    };
                    if let Some(exit) = self.on_sample(sample).await {
                        break exit;
                    }
                }
            }
        };

        if reports.send(MonitorReport { pool_id, exit }).await.is_err() {
            // Engine loop gone (shutdown race); nothing left to notify.
        }
    }

    /// Evaluate one sample; `Some` ends the monitor.
    async fn on_sample(&mut self, sample: PriceSample) -> Option<MonitorExit> {
        let decision = self.evaluator.evaluate(&mut self.position, &sample);
        // Keep the book's copy of the debounce state current so reporting
        // sees live unrealized P&L.
        self.book.update_position(&self.position).await;

        let reason = match decision {
            ExitDecision::Hold => return None,
            ExitDecision::Exit(reason) => reason,
        };

        info!(
            pool_id = %self.pool.pool_id,
            %reason,
            price = %sample.price,
            profit_pct = %self.position.profit_pct(sample.price),
            "exit condition met"
        );

        match self.submit_exit(sample.price).await {
            Ok(realized_pnl) => Some(MonitorExit::Closed {
                reason,
                realized_pnl,
            }),
            Err(TradeError::NoOpenPosition { .. }) => {
                // A late fill from an earlier timed-out submission already
                // closed the position.
                warn!(pool_id = %self.pool.pool_id, "position already closed");
                Some(MonitorExit::Closed {
                    reason,
                    realized_pnl: self.position.realized_pnl.unwrap_or(Decimal::ZERO),
                })
            }
            Err(e) if e.is_retryable() || e.is_unknown_outcome() => {
                // Keep monitoring; the next qualifying sample re-attempts.
                warn!(pool_id = %self.pool.pool_id, error = %e, "exit submission deferred");
                None
            }
            Err(e) => {
                warn!(pool_id = %self.pool.pool_id, error = %e, "exit submission failed");
                None
            }
        }
    }

    /// Submit a full exit and return the realized P&L.
    async fn submit_exit(&self, reference_price: Decimal) -> Result<Decimal, TradeError> {
        let request = TradeRequest::sell(
            self.pool.pool_id.clone(),
            dec!(100),
            self.queue.max_slippage_pct(),
        )
        .with_deadline(self.submission_deadline);

        let trade = self.queue.submit(&self.pool, request, reference_price).await?;
        Ok(trade.quote_amount - self.position.quote_spent)
    }

    /// Exit at the monitoring deadline: positions are force-exited, not
    /// abandoned. Retries a few times before giving up loudly.
    async fn force_exit(&self) -> MonitorExit {
        let reference_price = self.position.last_price;
        let mut last_err = TradeError::ExecutionFailed("no attempt made".to_string());

        for attempt in 1..=FORCED_EXIT_ATTEMPTS {
            match self.submit_exit(reference_price).await {
                Ok(realized_pnl) => {
                    return MonitorExit::Closed {
                        reason: ExitReason::MaxHoldTime,
                        realized_pnl,
                    }
                }
                Err(TradeError::NoOpenPosition { .. }) => {
                    return MonitorExit::Closed {
                        reason: ExitReason::MaxHoldTime,
                        realized_pnl: self.position.realized_pnl.unwrap_or(Decimal::ZERO),
                    }
                }
                Err(e) => {
                    warn!(
                        pool_id = %self.pool.pool_id,
                        attempt,
                        error = %e,
                        "forced exit attempt failed"
                    );
                    last_err = e;
                    if attempt < FORCED_EXIT_ATTEMPTS {
                        tokio::time::sleep(FORCED_EXIT_RETRY_DELAY).await;
                    }
                }
            }
        }

        error!(
            pool_id = %self.pool.pool_id,
            error = %last_err,
            "forced exit exhausted retries; position remains open"
        );
        MonitorExit::Abandoned { error: last_err }
    }
}
