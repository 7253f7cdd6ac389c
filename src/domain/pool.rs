use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolStatus {
    /// Discovery event received, age not yet checked against the price wait
    Discovered,
    /// Waiting for a first valid price sample
    PendingPrice,
    /// Price known, entry submitted or eligible for entry
    Monitoring,
    /// Position open, watching for exit conditions
    Trading,
    /// Position closed by a confirmed sell
    Closed,
    /// Aged out, rejected, or failed before a position could complete
    Expired,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Discovered => "DISCOVERED",
            PoolStatus::PendingPrice => "PENDING_PRICE",
            PoolStatus::Monitoring => "MONITORING",
            PoolStatus::Trading => "TRADING",
            PoolStatus::Closed => "CLOSED",
            PoolStatus::Expired => "EXPIRED",
        }
    }

    /// Check if this state can transition to another state.
    ///
    /// The lifecycle only moves forward; there is no path back from a
    /// terminal state and no path from Trading back to Monitoring.
    pub fn can_transition_to(&self, target: PoolStatus) -> bool {
        use PoolStatus::*;

        match (self, target) {
            // From Discovered
            (Discovered, PendingPrice) => true, // Fresh enough to wait for price
            (Discovered, Expired) => true,      // Too old at discovery

            // From PendingPrice
            (PendingPrice, Monitoring) => true, // First valid price arrived
            (PendingPrice, Expired) => true,    // Price wait timed out

            // From Monitoring
            (Monitoring, Trading) => true, // Buy confirmed
            (Monitoring, Expired) => true, // Buy failed / capacity / aged out

            // From Trading
            (Trading, Closed) => true, // Sell confirmed (incl. forced exit)

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<PoolStatus> {
        use PoolStatus::*;

        match self {
            Discovered => vec![PendingPrice, Expired],
            PendingPrice => vec![Monitoring, Expired],
            Monitoring => vec![Trading, Expired],
            Trading => vec![Closed],
            Closed => vec![],
            Expired => vec![],
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolStatus::Closed | PoolStatus::Expired)
    }

    /// Does this state hold one of the bounded monitor slots?
    pub fn holds_monitor_slot(&self) -> bool {
        matches!(self, PoolStatus::Monitoring | PoolStatus::Trading)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PoolStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "DISCOVERED" => Ok(PoolStatus::Discovered),
            "PENDING_PRICE" => Ok(PoolStatus::PendingPrice),
            "MONITORING" => Ok(PoolStatus::Monitoring),
            "TRADING" => Ok(PoolStatus::Trading),
            "CLOSED" => Ok(PoolStatus::Closed),
            "EXPIRED" => Ok(PoolStatus::Expired),
            _ => Err(format!("Unknown pool status: {}", s)),
        }
    }
}

/// Why a pool ended up Expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryReason {
    /// Discovery event older than max_pool_age_ms
    TooOld,
    /// No valid price within the wait window
    NoPrice,
    /// All monitor slots were busy when the pool qualified
    Capacity,
    /// Entry execution failed
    EntryFailed,
    /// Entry outcome unknown (deadline exceeded, not re-submitted)
    EntryTimeout,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExpiryReason::TooOld => "too_old",
            ExpiryReason::NoPrice => "no_price",
            ExpiryReason::Capacity => "capacity",
            ExpiryReason::EntryFailed => "entry_failed",
            ExpiryReason::EntryTimeout => "entry_timeout",
        };
        write!(f, "{}", s)
    }
}

/// A tradable liquidity pair tracked by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Opaque pool identifier (AMM account address on the wire)
    pub pool_id: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    /// Timestamp carried by the discovery event
    pub discovered_at: DateTime<Utc>,
    pub status: PoolStatus,
}

impl Pool {
    pub fn new(
        pool_id: impl Into<String>,
        base_mint: impl Into<String>,
        quote_mint: impl Into<String>,
        base_decimals: u8,
        quote_decimals: u8,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            base_mint: base_mint.into(),
            quote_mint: quote_mint.into(),
            base_decimals,
            quote_decimals,
            discovered_at,
            status: PoolStatus::Discovered,
        }
    }

    /// Age of the discovery event at `now`, in milliseconds. Events carrying
    /// a future timestamp (clock skew) count as age zero.
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.discovered_at).num_milliseconds().max(0) as u64
    }
}

/// A single price observation for a pool.
///
/// Samples are validated at the feed boundary: the engine only ever sees
/// strictly positive prices, and per-pool timestamp ordering is enforced by
/// the engine's watermark before a sample reaches a monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub pool_id: String,
    pub price: Decimal,
    pub base_reserve: Decimal,
    pub quote_reserve: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceSample {
    pub fn is_valid(&self) -> bool {
        self.price > Decimal::ZERO
    }
}

/// Record of a lifecycle transition (for logging and the ledger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolTransition {
    pub pool_id: String,
    pub from: PoolStatus,
    pub to: PoolStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl PoolTransition {
    pub fn new(
        pool_id: impl Into<String>,
        from: PoolStatus,
        to: PoolStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}
