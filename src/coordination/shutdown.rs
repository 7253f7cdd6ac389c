//! Graceful shutdown handler.
//!
//! Coordinates the stop sequence: the engine stops queue intake, signals
//! monitors, drains outstanding submissions, and reports anything left.
//! In-flight execution calls are allowed to complete or time out, never
//! hard-killed, so a swap that actually executed is never lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Second signal while already stopping; skip remaining drain work
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Shutdown coordinator shared across tasks
pub struct GracefulShutdown {
    requested: AtomicBool,
    signal_tx: broadcast::Sender<ShutdownSignal>,
    /// Level-triggered flag for tasks that join late
    flag_tx: watch::Sender<bool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = broadcast::channel(8);
        let (flag_tx, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            signal_tx,
            flag_tx,
        }
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Level-triggered receiver: `true` once shutdown has been requested
    pub fn flag(&self) -> watch::Receiver<bool> {
        self.flag_tx.subscribe()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown. A second request escalates to `Urgent`.
    pub fn request(&self, signal: ShutdownSignal) {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!(%signal, "shutdown already in progress, escalating");
            let _ = self.signal_tx.send(ShutdownSignal::Urgent);
            return;
        }

        info!(%signal, "shutdown requested");
        let _ = self.signal_tx.send(signal);
        let _ = self.flag_tx.send(true);
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers that request shutdown
pub async fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown_sigterm = Arc::clone(&shutdown);
        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            stream.recv().await;
            info!("received SIGTERM");
            shutdown_sigterm.request(ShutdownSignal::Graceful);
        });

        let shutdown_sigint = Arc::clone(&shutdown);
        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            loop {
                stream.recv().await;
                info!("received SIGINT");
                shutdown_sigint.request(ShutdownSignal::Graceful);
            }
        });
    }

    #[cfg(windows)]
    {
        let shutdown_ctrl_c = Arc::clone(&shutdown);
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            info!("received Ctrl+C");
            shutdown_ctrl_c.request(ShutdownSignal::Graceful);
        });
    }
}
