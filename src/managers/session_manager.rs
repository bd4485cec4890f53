//! Realtime session for Smartmarks.
//!
//! A `RealtimeSession` owns the bookmark store for one signed-in user and
//! keeps it in step with the backend:
//!
//! 1. `load_snapshot` seeds the store with the user's current bookmarks.
//! 2. `attach_feed` subscribes to the user's change feed and spawns a single
//!    dispatcher task that applies events one at a time, in delivery order.
//! 3. Records created locally are sent through `creation_sender` and applied
//!    by the same dispatcher, so they are deduplicated against the matching
//!    feed insert.
//! 4. `close` (or dropping the session) stops the dispatcher and releases the
//!    subscription.
//!
//! A dropped connection leaves a gap that idempotent events cannot repair;
//! `reconnect` resubscribes and reloads a fresh snapshot. `resync` reloads
//! the snapshot over a live feed: the dispatcher holds every event that
//! arrives while the fetch is in flight and replays them on top of it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::managers::bookmark_store::{BookmarkStore, BookmarkStoreTrait, BookmarkView};
use crate::services::change_feed::{ChangeFeed, FeedSubscription};
use crate::services::snapshot_loader::SnapshotLoader;
use crate::types::bookmark::Bookmark;
use crate::types::errors::{FeedError, SnapshotError};
use crate::types::event::FeedEvent;
use crate::types::session::AuthSession;
use crate::types::settings::RealtimeSettings;

/// Receiving ends drained by the dispatcher. Shared so a reconnect can hand
/// them to the next dispatcher.
struct Inbox {
    created: mpsc::UnboundedReceiver<Bookmark>,
    holds: mpsc::UnboundedReceiver<HoldRequest>,
}

type SharedInbox = Arc<AsyncMutex<Inbox>>;

/// Asks the dispatcher to stop applying events until `release` resolves.
struct HoldRequest {
    held: oneshot::Sender<()>,
    release: oneshot::Receiver<Option<Vec<Bookmark>>>,
    done: oneshot::Sender<()>,
}

/// Requester side of an acknowledged hold.
struct Hold {
    release: oneshot::Sender<Option<Vec<Bookmark>>>,
    done: oneshot::Receiver<()>,
}

impl Hold {
    /// Hands the snapshot (if any) to the dispatcher and waits until it has
    /// been applied along with everything held meanwhile.
    async fn release(self, snapshot: Option<Vec<Bookmark>>) {
        let _ = self.release.send(snapshot);
        let _ = self.done.await;
    }
}

enum Held {
    Payload(Value),
    Created(Bookmark),
}

/// Trait defining the session lifecycle.
#[async_trait::async_trait]
pub trait RealtimeSessionTrait {
    async fn load_snapshot(&self, loader: &dyn SnapshotLoader) -> Result<(), SnapshotError>;
    async fn attach_feed(&mut self, feed: &dyn ChangeFeed) -> Result<(), FeedError>;
    async fn resync(&self, loader: &dyn SnapshotLoader) -> Result<(), SnapshotError>;
    async fn reconnect(
        &mut self,
        loader: &dyn SnapshotLoader,
        feed: &dyn ChangeFeed,
    ) -> Result<(), FeedError>;
    fn close(&mut self);
}

/// Per-user realtime bookmark session.
pub struct RealtimeSession {
    auth: AuthSession,
    channel: String,
    store: Arc<BookmarkStore>,
    created_tx: mpsc::UnboundedSender<Bookmark>,
    hold_tx: mpsc::UnboundedSender<HoldRequest>,
    /// `None` once closed, so the receivers go away with the dispatcher.
    inbox: Option<SharedInbox>,
    dispatcher: Option<JoinHandle<()>>,
    closed: bool,
}

impl RealtimeSession {
    /// Creates a session with an empty, uninitialized store.
    pub fn new(auth: AuthSession, settings: &RealtimeSettings) -> Self {
        let channel = format!("{}-{}", settings.channel_prefix, auth.user_id);
        let (created_tx, created) = mpsc::unbounded_channel();
        let (hold_tx, holds) = mpsc::unbounded_channel();
        Self {
            auth,
            channel,
            store: Arc::new(BookmarkStore::new()),
            created_tx,
            hold_tx,
            inbox: Some(Arc::new(AsyncMutex::new(Inbox { created, holds }))),
            dispatcher: None,
            closed: false,
        }
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Read access for the rendering layer.
    pub fn store(&self) -> &Arc<BookmarkStore> {
        &self.store
    }

    pub fn current_view(&self) -> BookmarkView {
        self.store.current_view()
    }

    /// Sender for records created locally, applied as idempotent inserts.
    /// Sends start failing once the session is closed.
    pub fn creation_sender(&self) -> mpsc::UnboundedSender<Bookmark> {
        self.created_tx.clone()
    }

    /// Queues a locally created record for the dispatcher.
    pub fn notify_created(&self, bookmark: Bookmark) {
        if self.closed {
            debug!(channel = %self.channel, id = %bookmark.id, "session closed, ignoring created bookmark");
            return;
        }
        if let Err(rejected) = self.created_tx.send(bookmark) {
            debug!(channel = %self.channel, id = %rejected.0.id, "dispatcher gone, created bookmark dropped");
        }
    }

    /// Whether a dispatcher is currently running.
    pub fn is_attached(&self) -> bool {
        self.dispatcher
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waits until the view satisfies `predicate` or `timeout` elapses.
    /// Returns whether the predicate was met.
    pub async fn wait_for_view<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[Bookmark]) -> bool,
    {
        let mut changes = self.store.subscribe();
        let waited = tokio::time::timeout(timeout, changes.wait_for(|view| predicate(view.as_slice()))).await;
        matches!(waited, Ok(Ok(_)))
    }

    fn spawn_dispatcher(&mut self, subscription: FeedSubscription) {
        if let Some(inbox) = &self.inbox {
            let store = Arc::clone(&self.store);
            self.dispatcher = Some(tokio::spawn(dispatch(store, subscription, Arc::clone(inbox))));
        }
    }

    fn stop_dispatcher(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            // Dropping the task drops its subscription, which unsubscribes.
            handle.abort();
        }
    }

    /// Pauses the running dispatcher. `None` when no dispatcher is running,
    /// in which case nothing else writes to the store.
    async fn hold_dispatcher(&self) -> Option<Hold> {
        if !self.is_attached() {
            return None;
        }
        let (held, held_rx) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        let (done_tx, done) = oneshot::channel();
        self.hold_tx
            .send(HoldRequest {
                held,
                release: release_rx,
                done: done_tx,
            })
            .ok()?;
        held_rx.await.ok()?;
        Some(Hold { release, done })
    }
}

#[async_trait::async_trait]
impl RealtimeSessionTrait for RealtimeSession {
    /// Fetches the snapshot and replaces the store's contents with it.
    ///
    /// On failure the error is returned and the store is left untouched, so
    /// a fresh session keeps rendering as empty.
    async fn load_snapshot(&self, loader: &dyn SnapshotLoader) -> Result<(), SnapshotError> {
        match loader.load_snapshot(&self.auth).await {
            Ok(snapshot) => {
                info!(user_id = %self.auth.user_id, count = snapshot.len(), "snapshot loaded");
                self.store.initialize(snapshot);
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %self.auth.user_id, error = %e, "snapshot load failed");
                Err(e)
            }
        }
    }

    /// Subscribes to the user's change feed and starts applying events.
    async fn attach_feed(&mut self, feed: &dyn ChangeFeed) -> Result<(), FeedError> {
        if self.closed {
            return Err(FeedError::Closed(self.channel.clone()));
        }
        if self.is_attached() {
            return Err(FeedError::AlreadyAttached(self.channel.clone()));
        }

        let subscription = feed.subscribe(&self.channel, &self.auth.user_id).await?;
        info!(channel = %self.channel, "change feed attached");
        self.spawn_dispatcher(subscription);
        Ok(())
    }

    /// Replaces the view with a fresh snapshot, keeping the current feed.
    ///
    /// Events delivered while the fetch is in flight are held back and
    /// applied after the snapshot, so a change committed after the snapshot
    /// was read still lands in the view. On failure the held events are
    /// applied to the existing view.
    async fn resync(&self, loader: &dyn SnapshotLoader) -> Result<(), SnapshotError> {
        info!(channel = %self.channel, "resyncing from snapshot");
        let hold = match self.hold_dispatcher().await {
            Some(hold) => hold,
            None => return self.load_snapshot(loader).await,
        };

        match loader.load_snapshot(&self.auth).await {
            Ok(snapshot) => {
                info!(user_id = %self.auth.user_id, count = snapshot.len(), "snapshot loaded");
                hold.release(Some(snapshot)).await;
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %self.auth.user_id, error = %e, "snapshot load failed");
                hold.release(None).await;
                Err(e)
            }
        }
    }

    /// Drops the current subscription, opens a new one, and reloads the
    /// snapshot before applying anything delivered on the new channel.
    ///
    /// Subscribing first means events committed while the snapshot is in
    /// flight are buffered rather than lost.
    async fn reconnect(
        &mut self,
        loader: &dyn SnapshotLoader,
        feed: &dyn ChangeFeed,
    ) -> Result<(), FeedError> {
        if self.closed {
            return Err(FeedError::Closed(self.channel.clone()));
        }
        self.stop_dispatcher();

        let subscription = feed.subscribe(&self.channel, &self.auth.user_id).await?;
        if let Err(e) = self.resync(loader).await {
            // Keep the stale view; events on the new channel still apply.
            warn!(channel = %self.channel, error = %e, "resync snapshot failed");
        }
        info!(channel = %self.channel, "change feed reconnected");
        self.spawn_dispatcher(subscription);
        Ok(())
    }

    /// Stops event delivery and releases the subscription. Idempotent.
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_dispatcher();
        self.inbox = None;
        self.closed = true;
        info!(channel = %self.channel, "realtime session closed");
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.stop_dispatcher();
    }
}

/// Dispatcher loop: the only writer to the store once the feed is attached.
async fn dispatch(store: Arc<BookmarkStore>, mut subscription: FeedSubscription, inbox: SharedInbox) {
    let mut inbox = inbox.lock_owned().await;
    let Inbox { created, holds } = &mut *inbox;
    let channel = subscription.channel().to_string();
    let mut feed_open = true;

    loop {
        tokio::select! {
            biased;
            request = holds.recv() => match request {
                Some(request) => hold(&store, &channel, &mut subscription, created, &mut feed_open, request).await,
                None => break,
            },
            payload = subscription.next_payload(), if feed_open => match payload {
                Some(payload) => apply_payload(&store, &channel, &payload),
                None => {
                    info!(%channel, "change feed closed, view may be stale until resync");
                    feed_open = false;
                }
            },
            record = created.recv() => match record {
                Some(record) => {
                    debug!(id = %record.id, "applying locally created bookmark");
                    store.apply_insert(record);
                }
                None => break,
            },
        }
    }
}

/// Buffers feed payloads and created records until the requester releases
/// the hold, then applies the snapshot (if one came back) followed by the
/// buffered items in arrival order.
async fn hold(
    store: &BookmarkStore,
    channel: &str,
    subscription: &mut FeedSubscription,
    created: &mut mpsc::UnboundedReceiver<Bookmark>,
    feed_open: &mut bool,
    request: HoldRequest,
) {
    let HoldRequest {
        held,
        mut release,
        done,
    } = request;
    if held.send(()).is_err() {
        return;
    }

    let mut pending = Vec::new();
    let snapshot = loop {
        tokio::select! {
            biased;
            // A dropped requester counts as a release without a snapshot.
            outcome = &mut release => break outcome.ok().flatten(),
            payload = subscription.next_payload(), if *feed_open => match payload {
                Some(payload) => pending.push(Held::Payload(payload)),
                None => {
                    info!(%channel, "change feed closed during resync");
                    *feed_open = false;
                }
            },
            record = created.recv() => match record {
                Some(record) => pending.push(Held::Created(record)),
                None => break None,
            },
        }
    };

    if let Some(snapshot) = snapshot {
        store.initialize(snapshot);
    }
    debug!(%channel, held = pending.len(), "replaying events held during resync");
    for item in pending {
        match item {
            Held::Payload(payload) => apply_payload(store, channel, &payload),
            Held::Created(record) => {
                store.apply_insert(record);
            }
        }
    }
    let _ = done.send(());
}

/// Applies one raw payload. A malformed payload is logged and skipped; the
/// store is left unchanged.
pub(crate) fn apply_payload(store: &BookmarkStore, channel: &str, payload: &Value) {
    match FeedEvent::from_payload(payload) {
        Ok(event) => {
            store.apply_event(event);
        }
        Err(e) => {
            warn!(%channel, error = %e, "dropping malformed feed event");
        }
    }
}
