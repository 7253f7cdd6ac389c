//! Event transport boundary.
//!
//! The external feed delivers pool lifecycle events at least once, with no
//! ordering guarantee across pools. Everything downstream of this module
//! works with typed [`FeedEvent`]s on an mpsc channel; the engine never sees
//! the wire format. Tests and replays inject events into the same channel
//! the WebSocket client produces into.

pub mod ws;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::PriceSample;
use crate::error::{Result, SniperError};

pub use ws::WsFeed;

/// Typed pool lifecycle event
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A new pool appeared on the venue
    PoolDiscovered {
        pool_id: String,
        base_mint: String,
        quote_mint: String,
        base_decimals: u8,
        quote_decimals: u8,
        initial_price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
    /// The pool became tradeable
    PoolReady {
        pool_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Price/reserve update for a pool
    PriceUpdated { sample: PriceSample },
}

/// Wire form of feed messages: JSON tagged by `event`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireMessage {
    NewPool {
        #[serde(rename = "poolId")]
        pool_id: String,
        #[serde(rename = "baseMint")]
        base_mint: String,
        #[serde(rename = "quoteMint")]
        quote_mint: String,
        #[serde(rename = "baseDecimals", default = "default_decimals")]
        base_decimals: u8,
        #[serde(rename = "quoteDecimals", default = "default_decimals")]
        quote_decimals: u8,
        #[serde(rename = "initialPrice", default)]
        initial_price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
    PoolReady {
        #[serde(rename = "poolId")]
        pool_id: String,
        timestamp: DateTime<Utc>,
    },
    PoolUpdate {
        pool_id: String,
        price: Decimal,
        #[serde(default)]
        base_reserve: Decimal,
        #[serde(default)]
        quote_reserve: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// Server heartbeat; consumed and dropped
    Health {},
}

fn default_decimals() -> u8 {
    9
}

/// Parse one wire message into a feed event.
///
/// Returns `Ok(None)` for messages that carry no engine-relevant payload
/// (heartbeats). Malformed messages are an `InvalidEvent` error; the feed
/// client logs and drops them without disturbing the stream.
pub fn parse_message(text: &str) -> Result<Option<FeedEvent>> {
    let message: WireMessage = serde_json::from_str(text)
        .map_err(|e| SniperError::InvalidEvent(format!("{e}: {}", truncate(text, 120))))?;

    let event = match message {
        WireMessage::NewPool {
            pool_id,
            base_mint,
            quote_mint,
            base_decimals,
            quote_decimals,
            initial_price,
            timestamp,
        } => {
            if pool_id.is_empty() {
                return Err(SniperError::InvalidEvent(
                    "new_pool without pool id".to_string(),
                ));
            }
            FeedEvent::PoolDiscovered {
                pool_id,
                base_mint,
                quote_mint,
                base_decimals,
                quote_decimals,
                initial_price,
                timestamp,
            }
        }
        WireMessage::PoolReady { pool_id, timestamp } => {
            if pool_id.is_empty() {
                return Err(SniperError::InvalidEvent(
                    "pool_ready without pool id".to_string(),
                ));
            }
            FeedEvent::PoolReady { pool_id, timestamp }
        }
        WireMessage::PoolUpdate {
            pool_id,
            price,
            base_reserve,
            quote_reserve,
            timestamp,
        } => {
            if pool_id.is_empty() {
                return Err(SniperError::InvalidEvent(
                    "pool_update without pool id".to_string(),
                ));
            }
            FeedEvent::PriceUpdated {
                sample: PriceSample {
                    pool_id,
                    price,
                    base_reserve,
                    quote_reserve,
                    timestamp,
                },
            }
        }
        WireMessage::Health {} => return Ok(None),
    };

    Ok(Some(event))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
