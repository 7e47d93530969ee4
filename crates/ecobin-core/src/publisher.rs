//! Telemetry Publisher - Best-Effort Broker Publishing
//!
//! Owns the connection lifecycle to the pub/sub broker:
//!
//! ```text
//!  DISCONNECTED ──connect()──▶ CONNECTING ──session──▶ CONNECTED
//!                                  │  ▲                    │
//!                     first attempt│  └────transport drop──┘
//!                         fails    ▼
//!                               FAILED
//! ```
//!
//! After the first session is established a background task polls the link
//! and reconnects indefinitely on drops. The tick path only ever observes
//! the state through a `watch` channel; it never drives reconnection.
//!
//! Publishing is at-most-once: a publish attempted while not CONNECTED is
//! dropped, counted, and reported to the caller. Nothing is queued.

use crate::reading::Reading;
use crate::transport::{LinkDriver, LinkEvent, LinkSender, SplitLink};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TOPIC_PREFIX: &str = "smart_city/waste";

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The initial connection attempt failed; terminal
    Failed,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub topic_prefix: String,
    pub connect_timeout: Duration,
    pub retry_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            connect_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
pub struct PublisherStats {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
    pub transport_drops: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Errors that can occur while connecting or publishing
#[derive(Debug, Clone, PartialEq)]
pub enum PublishError {
    /// The initial connection could not be established
    Connection(String),
    /// Publish attempted while not connected
    Dropped { topic: String },
    /// The link refused to enqueue the message
    Transport(String),
    Encode(String),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Could not connect to broker: {}", e),
            Self::Dropped { topic } => write!(f, "Publish to {} dropped: not connected", topic),
            Self::Transport(e) => write!(f, "Transport rejected publish: {}", e),
            Self::Encode(e) => write!(f, "Failed to encode payload: {}", e),
        }
    }
}

impl std::error::Error for PublishError {}

/// Topic a bin publishes on
pub fn topic_for(prefix: &str, bin_id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), bin_id)
}

pub struct TelemetryPublisher {
    sender: Option<Box<dyn LinkSender>>,
    state: watch::Receiver<ConnectionState>,
    config: PublisherConfig,
    stats: Arc<PublisherStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    // Keeps the channel open for publishers that never spawned a task
    _state_tx: Option<watch::Sender<ConnectionState>>,
}

impl TelemetryPublisher {
    /// Establish the first session over `link`.
    ///
    /// Fails with [`PublishError::Connection`] if the broker refuses, the
    /// transport errors, or no session is established within
    /// `connect_timeout`. On success the reconnect task is running.
    pub async fn connect(link: SplitLink, config: PublisherConfig) -> Result<Self, PublishError> {
        let (sender, mut driver) = link;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        debug!("Connecting to broker");

        let first =
            tokio::time::timeout(config.connect_timeout, Self::await_session(&mut *driver)).await;
        let failure = match first {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(_) => Some(format!(
                "no session within {}ms",
                config.connect_timeout.as_millis()
            )),
        };
        if let Some(reason) = failure {
            state_tx.send_replace(ConnectionState::Failed);
            error!(reason = %reason, "Could not connect to broker");
            return Err(PublishError::Connection(reason));
        }

        state_tx.send_replace(ConnectionState::Connected);
        info!(topic_prefix = %config.topic_prefix, "Connected to broker");

        let stats = Arc::new(PublisherStats::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::maintain(
            driver,
            state_tx,
            cancel.clone(),
            config.retry_delay,
            stats.clone(),
        ));

        Ok(Self {
            sender: Some(sender),
            state: state_rx,
            config,
            stats,
            cancel,
            task: Some(task),
            _state_tx: None,
        })
    }

    /// A publisher with no broker behind it. Every publish is dropped.
    pub fn offline(config: PublisherConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Failed);
        Self {
            sender: None,
            state: state_rx,
            config,
            stats: Arc::new(PublisherStats::default()),
            cancel: CancellationToken::new(),
            task: None,
            _state_tx: Some(state_tx),
        }
    }

    async fn await_session(driver: &mut dyn LinkDriver) -> Result<(), String> {
        loop {
            match driver.poll().await {
                LinkEvent::Connected => return Ok(()),
                LinkEvent::Dropped(reason) => return Err(reason),
                LinkEvent::Activity => {}
            }
        }
    }

    async fn maintain(
        mut driver: Box<dyn LinkDriver>,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
        retry_delay: Duration,
        stats: Arc<PublisherStats>,
    ) {
        loop {
            match driver.poll().await {
                LinkEvent::Connected => {
                    if *state_tx.borrow() != ConnectionState::Connected {
                        stats.reconnects.fetch_add(1, Ordering::Relaxed);
                        info!("Reconnected to broker");
                    }
                    state_tx.send_replace(ConnectionState::Connected);
                }
                LinkEvent::Dropped(reason) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if *state_tx.borrow() == ConnectionState::Connected {
                        stats.transport_drops.fetch_add(1, Ordering::Relaxed);
                        warn!(reason = %reason, "Disconnected from broker, reconnecting");
                    } else {
                        debug!(reason = %reason, "Reconnect attempt failed");
                    }
                    state_tx.send_replace(ConnectionState::Connecting);

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                }
                LinkEvent::Activity => {}
            }
        }

        state_tx.send_replace(ConnectionState::Disconnected);
        debug!("Broker connection task stopped");
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch handle for connection transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`, up to `timeout`
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn topic(&self, bin_id: &str) -> String {
        topic_for(&self.config.topic_prefix, bin_id)
    }

    /// Publish one reading on `topic`. Never blocks and never retries.
    pub fn publish(&self, topic: &str, reading: &Reading) -> Result<(), PublishError> {
        let sender = match (&self.sender, self.state()) {
            (Some(sender), ConnectionState::Connected) => sender,
            _ => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(PublishError::Dropped {
                    topic: topic.to_string(),
                });
            }
        };

        let payload = reading
            .to_payload()
            .map_err(|e| PublishError::Encode(e.to_string()))?;

        match sender.send(topic, payload) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PublishError::Transport(e))
            }
        }
    }

    /// Stop reconnecting and close the session gracefully
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();

        if let Some(sender) = &self.sender {
            if let Err(e) = sender.disconnect() {
                debug!(error = %e, "Disconnect request not sent");
            }
        }

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(self.config.shutdown_grace, &mut task)
                .await
                .is_err()
            {
                warn!("Broker connection did not close in time, aborting");
                task.abort();
            }
            info!("Disconnected from broker");
        }
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
