//! Exit condition evaluation.
//!
//! Pure with respect to I/O: the evaluator reads the sample and mutates only
//! the position's debounce counter and last-price fields, both owned by the
//! pool's monitor. Stop-loss acts on the first qualifying observation;
//! take-profit requires N consecutive qualifying observations so a single
//! noisy tick cannot trigger an exit.

use rust_decimal::Decimal;
use std::fmt;

use crate::config::ExitConfig;
use crate::domain::{Position, PriceSample};

/// Why a position is being exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// Monitoring time limit reached; position force-exited
    MaxHoldTime,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::MaxHoldTime => "max_hold_time",
        };
        write!(f, "{}", s)
    }
}

/// Decision for a single price sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    Exit(ExitReason),
}

/// Threshold evaluator with take-profit debounce
#[derive(Debug, Clone)]
pub struct ExitEvaluator {
    profit_threshold: Decimal,
    stop_loss_threshold: Decimal,
    consecutive_required: u32,
}

impl ExitEvaluator {
    pub fn new(config: &ExitConfig) -> Self {
        Self {
            profit_threshold: config.exit_profit_threshold,
            stop_loss_threshold: config.stop_loss_threshold,
            consecutive_required: config.consecutive_updates_required,
        }
    }

    /// Evaluate one sample against the position.
    ///
    /// The caller guarantees the sample passed upstream validation (strictly
    /// positive price, non-decreasing timestamp for this pool).
    pub fn evaluate(&self, position: &mut Position, sample: &PriceSample) -> ExitDecision {
        position.last_price = sample.price;
        let profit_pct = position.profit_pct(sample.price);

        // Losses are acted on immediately, regardless of the counter.
        if profit_pct <= self.stop_loss_threshold {
            position.consecutive_profit_updates = 0;
            return ExitDecision::Exit(ExitReason::StopLoss);
        }

        if profit_pct >= self.profit_threshold {
            position.consecutive_profit_updates += 1;
            if position.consecutive_profit_updates >= self.consecutive_required {
                return ExitDecision::Exit(ExitReason::TakeProfit);
            }
        } else {
            position.consecutive_profit_updates = 0;
        }

        ExitDecision::Hold
    }
}
