//! WebSocket feed client.
//!
//! Connects to the pool event publisher and forwards parsed events into the
//! engine's channel. Reconnects with capped backoff; malformed messages are
//! logged and dropped so one bad payload never stalls the stream.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::FeedConfig;
use crate::error::{Result, SniperError};

use super::{parse_message, FeedEvent};

/// How often to send ping frames
const PING_INTERVAL_SECS: u64 = 30;

/// Event channel capacity
const CHANNEL_CAPACITY: usize = 1024;

/// WebSocket client for the pool lifecycle feed
pub struct WsFeed {
    config: FeedConfig,
    events_tx: mpsc::Sender<FeedEvent>,
}

impl WsFeed {
    /// Create the feed and the receiver the engine consumes
    pub fn new(config: FeedConfig) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { config, events_tx }, events_rx)
    }

    /// Run the connection with automatic reconnection. Returns only when
    /// the engine side of the channel is gone.
    pub async fn run(self) -> Result<()> {
        let mut attempt: u32 = 0;
        let max_delay = Duration::from_secs(self.config.max_reconnect_delay_secs);

        info!(url = %self.config.ws_url, "starting pool feed");

        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("feed connection closed normally");
                    attempt = 0;
                }
                Err(SniperError::Cancelled) => {
                    info!("feed consumer gone, stopping");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    error!(attempt, error = %e, "feed connection error");
                }
            }

            let base = Duration::from_secs(self.config.reconnect_delay_secs);
            let delay = (base * attempt.max(1).min(10)).min(max_delay);
            info!(?delay, "reconnecting to feed");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let url = Url::parse(&self.config.ws_url)
            .map_err(|e| SniperError::Internal(format!("invalid feed URL: {e}")))?;

        let (ws_stream, _) = tokio::time::timeout(Duration::from_secs(10), connect_async(url.as_str()))
            .await
            .map_err(|_| SniperError::FeedDisconnected("connection timeout".to_string()))?
            .map_err(SniperError::WebSocket)?;

        info!("feed connected");

        let (mut write, mut read) = ws_stream.split();
        let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!(error = %e, "failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("feed sent close frame");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(SniperError::WebSocket(e));
                        }
                        None => {
                            return Err(SniperError::FeedDisconnected(
                                "stream ended".to_string(),
                            ));
                        }
                        _ => {}
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "failed to send ping");
                        return Err(SniperError::WebSocket(e));
                    }
                    debug!("feed ping sent");
                }
            }
        }
    }

    /// Parse and forward one message. `Cancelled` signals the engine hung up.
    async fn handle_text(&self, text: &str) -> Result<()> {
        match parse_message(text) {
            Ok(Some(event)) => {
                if self.events_tx.send(event).await.is_err() {
                    return Err(SniperError::Cancelled);
                }
            }
            Ok(None) => {}
            Err(e) => {
                // At-least-once feed: a malformed payload is dropped, never
                // allowed to take the stream down.
                warn!(error = %e, "invalid feed message dropped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_text_forwards_events() {
        let (feed, mut rx) = WsFeed::new(FeedConfig {
            ws_url: "ws://localhost:5001/events".to_string(),
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        });

        feed.handle_text(
            r#"{"event":"pool_ready","poolId":"p1","timestamp":"2025-06-01T12:00:00Z"}"#,
        )
        .await
        .unwrap();

        match rx.recv().await.unwrap() {
            FeedEvent::PoolReady { pool_id, .. } => assert_eq!(pool_id, "p1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_text_drops_malformed() {
        let (feed, mut rx) = WsFeed::new(FeedConfig {
            ws_url: "ws://localhost:5001/events".to_string(),
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        });

        // Does not error, does not emit
        feed.handle_text("{garbage").await.unwrap();
        feed.handle_text(r#"{"event":"health"}"#).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_text_cancelled_when_receiver_dropped() {
        let (feed, rx) = WsFeed::new(FeedConfig {
            ws_url: "ws://localhost:5001/events".to_string(),
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        });
        drop(rx);

        let err = feed
            .handle_text(
                r#"{"event":"pool_ready","poolId":"p1","timestamp":"2025-06-01T12:00:00Z"}"#,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SniperError::Cancelled));
    }
}
