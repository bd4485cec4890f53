//! Change feed subscriptions for Smartmarks.
//!
//! A change feed delivers raw insert/delete payloads for one user over a
//! named channel. `FeedSubscription` is the live handle: it yields payloads in
//! delivery order and releases the underlying channel when `unsubscribe` is
//! called or when it is dropped.
//!
//! `LocalChangeFeed` is an in-process transport built on
//! `tokio::sync::broadcast`, used by the local backend and in tests.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::errors::FeedError;

/// Trait defining change feed subscription.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens `channel`, delivering only changes that belong to `user_id`.
    async fn subscribe(&self, channel: &str, user_id: &str) -> Result<FeedSubscription, FeedError>;
}

type Teardown = Box<dyn FnOnce() + Send>;

/// A live change feed subscription.
pub struct FeedSubscription {
    channel: String,
    events: mpsc::Receiver<Value>,
    teardown: Option<Teardown>,
}

impl FeedSubscription {
    /// Wraps a payload receiver. `teardown` runs exactly once, on
    /// `unsubscribe` or drop, and must release the transport side.
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::Receiver<Value>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next payload. `None` once the transport has closed.
    pub async fn next_payload(&mut self) -> Option<Value> {
        self.events.recv().await
    }

    /// Releases the channel.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            debug!(channel = %self.channel, "unsubscribing from change feed");
            self.events.close();
            teardown();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("channel", &self.channel)
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

/// A change published on the local feed: owning user plus raw payload.
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub user_id: String,
    pub payload: Value,
}

/// In-process change feed.
///
/// Every subscriber gets its own forwarding task that filters the shared
/// broadcast stream down to one user.
#[derive(Clone)]
pub struct LocalChangeFeed {
    sender: broadcast::Sender<FeedMessage>,
    buffer: usize,
}

impl LocalChangeFeed {
    /// Creates a feed whose subscribers buffer up to `buffer` payloads.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender, buffer }
    }

    /// Publishes a payload for `user_id`. Returns the number of subscriptions
    /// that were live at the time, across all users.
    pub fn publish(&self, user_id: &str, payload: Value) -> usize {
        self.sender
            .send(FeedMessage {
                user_id: user_id.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn spawn_forwarder(
        &self,
        channel: String,
        user_id: String,
        out: mpsc::Sender<Value>,
    ) -> JoinHandle<()> {
        let mut incoming = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match incoming.recv().await {
                    Ok(message) if message.user_id == user_id => {
                        if out.send(message.payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Skipped events cannot be recovered here; the view
                        // stays stale until the session resyncs.
                        warn!(%channel, skipped, "change feed lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(%channel, "change feed forwarder stopped");
        })
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, channel: &str, user_id: &str) -> Result<FeedSubscription, FeedError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let forwarder = self.spawn_forwarder(channel.to_string(), user_id.to_string(), tx);
        debug!(%channel, %user_id, "subscribed to local change feed");
        Ok(FeedSubscription::new(channel, rx, move || forwarder.abort()))
    }
}
