//! Live execution adapter.
//!
//! Delegates swaps to an external swap service over HTTP. The service owns
//! wallet keys, AMM math, and transaction submission; this adapter only maps
//! requests and responses. One HTTP call per logical submission.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{BuyOrder, ExecResult, ExecutionAdapter, ExecutionError, SellOrder, TradeFill};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct SwapBuyRequest<'a> {
    pool_id: &'a str,
    quote_amount: Decimal,
    slippage_pct: Decimal,
}

#[derive(Debug, Serialize)]
struct SwapSellRequest<'a> {
    pool_id: &'a str,
    base_amount: Decimal,
    position_pct: Decimal,
    slippage_pct: Decimal,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    status: String,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    base_amount: Option<Decimal>,
    #[serde(default)]
    quote_amount: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
}

impl SwapResponse {
    fn into_fill(self, pool_id: &str) -> ExecResult {
        if !self.status.eq_ignore_ascii_case("confirmed") {
            let reason = self
                .error
                .unwrap_or_else(|| format!("swap service returned status {}", self.status));
            return Err(ExecutionError::Rejected(reason));
        }

        let missing = |field: &str| {
            ExecutionError::Rejected(format!(
                "confirmed swap for {} missing field {}",
                pool_id, field
            ))
        };

        Ok(TradeFill {
            signature: self.signature.ok_or_else(|| missing("signature"))?,
            base_amount: self.base_amount.ok_or_else(|| missing("base_amount"))?,
            quote_amount: self.quote_amount.ok_or_else(|| missing("quote_amount"))?,
            price: self.price.ok_or_else(|| missing("price"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// HTTP client for the external swap service
pub struct SwapServiceAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl SwapServiceAdapter {
    pub fn new(base_url: impl Into<String>) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post_swap<T: Serialize>(&self, path: &str, body: &T, pool_id: &str) -> ExecResult {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        debug!(%url, pool_id, "submitting swap");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(pool_id, %status, "swap service error response");
            return Err(ExecutionError::Rejected(format!(
                "swap service HTTP {}: {}",
                status, text
            )));
        }

        let parsed: SwapResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::Transport(format!("invalid swap response: {}", e)))?;

        parsed.into_fill(pool_id)
    }
}

#[async_trait]
impl ExecutionAdapter for SwapServiceAdapter {
    async fn buy(&self, order: &BuyOrder) -> ExecResult {
        let body = SwapBuyRequest {
            pool_id: &order.pool_id,
            quote_amount: order.quote_amount,
            slippage_pct: order.max_slippage_pct,
        };
        self.post_swap("buy", &body, &order.pool_id).await
    }

    async fn sell(&self, order: &SellOrder) -> ExecResult {
        let body = SwapSellRequest {
            pool_id: &order.pool_id,
            base_amount: order.base_amount,
            position_pct: order.position_pct,
            slippage_pct: order.max_slippage_pct,
        };
        self.post_swap("sell", &body, &order.pool_id).await
    }

    fn name(&self) -> &'static str {
        "swap-service"
    }
}
