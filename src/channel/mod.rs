//! Change notification channel: push delivery with automatic reconnect.
//!
//! DESIGN
//! ======
//! A `NotificationSource` opens one stream of notifications for an event.
//! `subscribe` wraps it in a task that forwards every notification to the
//! room and reconnects with exponential backoff plus jitter when the stream
//! drops. The room learns about connects, drops, and give-ups as
//! `ChannelEvent`s and re-pulls after every reconnect.
//!
//! Dropping the `Subscription` aborts the task, which closes the stream.
//!
//! ERROR HANDLING
//! ==============
//! A frame that fails to decode is skipped, not fatal. Any other stream
//! error ends the connection and counts toward the reconnect budget. When
//! the budget is spent the task reports `GaveUp` and exits.

pub mod ws;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use ws::WsSource;

use crate::frame::ErrorCode;
use crate::notification::Notification;

/// Capacity of the subscription → room queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// TYPES
// =============================================================================

pub type NotificationStream = BoxStream<'static, Result<Notification, ChannelError>>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("undecodable frame: {0}")]
    Decode(String),
    #[error("connection closed")]
    Closed,
}

impl ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "E_CHANNEL_CONNECT",
            Self::Rejected(_) => "E_CHANNEL_REJECTED",
            Self::Decode(_) => "E_CHANNEL_DECODE",
            Self::Closed => "E_CHANNEL_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// What the subscription task reports to its room.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Stream open. `reconnect` is true for every connect after the first.
    Connected { reconnect: bool },
    Notification(Notification),
    /// Stream ended; a reconnect is scheduled.
    Dropped { reason: String },
    /// Reconnect budget spent; the task has exited.
    GaveUp { attempts: u32 },
}

/// Push delivery of notifications for one event.
#[async_trait::async_trait]
pub trait NotificationSource: Send + Sync {
    /// Open a stream of notifications for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns a `ChannelError` if the connection or join handshake fails.
    async fn connect(&self, event_id: Uuid) -> Result<NotificationStream, ChannelError>;
}

// =============================================================================
// RECONNECT POLICY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1_u32 << exp).min(self.max)
    }

    /// `delay` plus up to 25% random jitter.
    #[must_use]
    pub fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(0);
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// A live subscription. Aborts its task on drop.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Tear down the subscription and close its stream.
    pub fn unsubscribe(self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn the reconnecting subscription task for one event.
pub fn subscribe(
    source: Arc<dyn NotificationSource>,
    event_id: Uuid,
    policy: ReconnectPolicy,
) -> (Subscription, mpsc::Receiver<ChannelEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let handle = tokio::spawn(run_subscription(source, event_id, policy, tx));
    (Subscription { handle }, rx)
}

async fn run_subscription(
    source: Arc<dyn NotificationSource>,
    event_id: Uuid,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<ChannelEvent>,
) {
    let mut attempt: u32 = 0;
    let mut connected_before = false;

    loop {
        match source.connect(event_id).await {
            Ok(mut stream) => {
                attempt = 0;
                info!(%event_id, reconnect = connected_before, "notification channel connected");
                if tx.send(ChannelEvent::Connected { reconnect: connected_before }).await.is_err() {
                    return;
                }
                connected_before = true;

                let reason = loop {
                    match stream.next().await {
                        Some(Ok(notification)) => {
                            if tx.send(ChannelEvent::Notification(notification)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(ChannelError::Decode(e))) => {
                            debug!(%event_id, error = %e, "skipping undecodable frame");
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break ChannelError::Closed.to_string(),
                    }
                };
                warn!(%event_id, reason = %reason, "notification channel dropped");
                if tx.send(ChannelEvent::Dropped { reason }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(%event_id, error = %e, attempt, "notification channel connect failed");
            }
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            error!(%event_id, attempts = policy.max_attempts, "notification channel gave up");
            let _ = tx.send(ChannelEvent::GaveUp { attempts: policy.max_attempts }).await;
            return;
        }
        tokio::time::sleep(policy.jittered(attempt)).await;
    }
}
