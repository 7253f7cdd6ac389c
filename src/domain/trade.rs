use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade confirmation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Confirmed => "CONFIRMED",
            TradeStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TradeStatus::Pending),
            "CONFIRMED" => Ok(TradeStatus::Confirmed),
            "FAILED" => Ok(TradeStatus::Failed),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}

/// Immutable record of an executed (or failed) trade.
///
/// The signature is the idempotency key for every downstream side effect:
/// balance adjustments and ledger writes are applied at most once per
/// signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Transaction signature (unique)
    pub signature: String,
    pub pool_id: String,
    pub side: TradeSide,
    /// Base token amount bought or sold
    pub base_amount: Decimal,
    /// Quote (SOL) amount spent or received
    pub quote_amount: Decimal,
    /// Effective fill price (quote per base)
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn is_confirmed(&self) -> bool {
        self.status == TradeStatus::Confirmed
    }
}

/// Sizing for a submission: buys are sized in quote units, sells as a
/// percentage of the open position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Sizing {
    /// Spend this much quote (SOL)
    QuoteAmount(Decimal),
    /// Sell this fraction of the open position (0 < pct <= 100)
    PositionPct(Decimal),
}

/// A request handed to the trade queue
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub pool_id: String,
    pub side: TradeSide,
    pub sizing: Sizing,
    pub max_slippage_pct: Decimal,
    /// Total budget from admission to confirmation
    pub deadline: Duration,
}

impl TradeRequest {
    pub fn buy(pool_id: impl Into<String>, quote_amount: Decimal, max_slippage_pct: Decimal) -> Self {
        Self {
            pool_id: pool_id.into(),
            side: TradeSide::Buy,
            sizing: Sizing::QuoteAmount(quote_amount),
            max_slippage_pct,
            deadline: Duration::from_secs(30),
        }
    }

    pub fn sell(
        pool_id: impl Into<String>,
        position_pct: Decimal,
        max_slippage_pct: Decimal,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            side: TradeSide::Sell,
            sizing: Sizing::PositionPct(position_pct),
            max_slippage_pct,
            deadline: Duration::from_secs(30),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_status_round_trip() {
        assert_eq!(
            TradeStatus::try_from("confirmed").unwrap(),
            TradeStatus::Confirmed
        );
        assert!(TradeStatus::try_from("settled").is_err());
    }

    #[test]
    fn test_request_builders() {
        let buy = TradeRequest::buy("pool-1", dec!(0.005), dec!(5));
        assert_eq!(buy.side, TradeSide::Buy);
        assert_eq!(buy.sizing, Sizing::QuoteAmount(dec!(0.005)));

        let sell = TradeRequest::sell("pool-1", dec!(100), dec!(5))
            .with_deadline(Duration::from_secs(10));
        assert_eq!(sell.side, TradeSide::Sell);
        assert_eq!(sell.deadline, Duration::from_secs(10));
    }
}
