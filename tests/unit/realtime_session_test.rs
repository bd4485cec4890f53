//! Unit tests for the realtime session: snapshot seeding, feed dispatch,
//! optimistic inserts, resync, and teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use smartmarks::managers::session_manager::{RealtimeSession, RealtimeSessionTrait};
use smartmarks::services::bookmark_actions::BookmarkActions;
use smartmarks::services::backend::BookmarkBackend;
use smartmarks::services::change_feed::{ChangeFeed, FeedSubscription};
use smartmarks::services::local_backend::LocalBackend;
use smartmarks::services::snapshot_loader::SnapshotLoader;
use smartmarks::types::bookmark::{Bookmark, NewBookmark};
use smartmarks::types::errors::{FeedError, SnapshotError};
use smartmarks::types::event::FeedEvent;
use smartmarks::types::session::AuthSession;
use smartmarks::types::settings::RealtimeSettings;

const WAIT: Duration = Duration::from_secs(2);

fn bookmark(id: &str, day: u32) -> Bookmark {
    Bookmark {
        id: id.to_string(),
        title: format!("Title {}", id),
        url: format!("https://{}.test", id),
        created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
    }
}

fn ids(view: &[Bookmark]) -> Vec<&str> {
    view.iter().map(|b| b.id.as_str()).collect()
}

fn user(id: &str) -> AuthSession {
    AuthSession::new(id, None, "token")
}

fn session(user_id: &str) -> RealtimeSession {
    RealtimeSession::new(AuthSession::new(user_id, None, "token"), &RealtimeSettings::default())
}

struct StaticLoader(Vec<Bookmark>);

#[async_trait]
impl SnapshotLoader for StaticLoader {
    async fn load_snapshot(&self, _auth: &AuthSession) -> Result<Vec<Bookmark>, SnapshotError> {
        Ok(self.0.clone())
    }
}

struct FailingLoader;

#[async_trait]
impl SnapshotLoader for FailingLoader {
    async fn load_snapshot(&self, _auth: &AuthSession) -> Result<Vec<Bookmark>, SnapshotError> {
        Err(SnapshotError::Http("connection refused".to_string()))
    }
}

/// Reads the snapshot, then commits another bookmark before answering, so
/// the returned snapshot is already stale.
struct StaleLoader {
    backend: Arc<LocalBackend>,
}

#[async_trait]
impl SnapshotLoader for StaleLoader {
    async fn load_snapshot(&self, auth: &AuthSession) -> Result<Vec<Bookmark>, SnapshotError> {
        let snapshot = self.backend.list_for_user(&auth.user_id)?;
        self.backend
            .insert_bookmark(auth, &NewBookmark::parse("Late", "https://late.test").unwrap())
            .await
            .map_err(|e| SnapshotError::Database(e.to_string()))?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(snapshot)
    }
}

/// Feed whose payloads are pushed by the test.
struct ScriptedFeed {
    events: Mutex<Option<mpsc::Receiver<Value>>>,
    torn_down: Arc<AtomicBool>,
}

impl ScriptedFeed {
    fn new() -> (Self, mpsc::Sender<Value>) {
        let (tx, rx) = mpsc::channel(32);
        let feed = Self {
            events: Mutex::new(Some(rx)),
            torn_down: Arc::new(AtomicBool::new(false)),
        };
        (feed, tx)
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn subscribe(&self, channel: &str, _user_id: &str) -> Result<FeedSubscription, FeedError> {
        let rx = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FeedError::SubscribeFailed("already subscribed".to_string()))?;
        let flag = Arc::clone(&self.torn_down);
        Ok(FeedSubscription::new(channel, rx, move || flag.store(true, Ordering::SeqCst)))
    }
}

#[tokio::test]
async fn test_snapshot_then_feed_events_in_order() {
    let mut s = session("alice");
    s.load_snapshot(&StaticLoader(vec![bookmark("A", 2), bookmark("B", 1)]))
        .await
        .unwrap();
    assert_eq!(ids(&s.current_view()), vec!["A", "B"]);

    let (feed, tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();

    tx.send(FeedEvent::Insert(bookmark("C", 3)).to_payload()).await.unwrap();
    tx.send(FeedEvent::Delete { id: "A".to_string() }.to_payload()).await.unwrap();
    tx.send(FeedEvent::Insert(bookmark("C", 3)).to_payload()).await.unwrap();
    tx.send(FeedEvent::Delete { id: "Z".to_string() }.to_payload()).await.unwrap();

    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["C", "B"]).await);
    // Let any trailing events drain, then confirm nothing else moved.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ids(&s.current_view()), vec!["C", "B"]);
}

#[tokio::test]
async fn test_malformed_payload_is_skipped() {
    let mut s = session("alice");
    s.load_snapshot(&StaticLoader(vec![bookmark("A", 1)])).await.unwrap();
    let (feed, tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();

    tx.send(json!({"eventType": "DELETE", "old": {}})).await.unwrap();
    tx.send(json!({"eventType": "UPDATE", "new": {}, "old": {}})).await.unwrap();
    tx.send(FeedEvent::Insert(bookmark("B", 2)).to_payload()).await.unwrap();

    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["B", "A"]).await);
}

#[tokio::test]
async fn test_snapshot_failure_leaves_view_empty() {
    let s = session("alice");
    let err = s.load_snapshot(&FailingLoader).await.unwrap_err();

    assert!(matches!(err, SnapshotError::Http(ref msg) if msg == "connection refused"));
    assert!(s.current_view().is_empty());
    assert!(!s.store().is_initialized());
}

#[tokio::test]
async fn test_events_apply_after_failed_snapshot() {
    let mut s = session("alice");
    let _ = s.load_snapshot(&FailingLoader).await;
    let (feed, tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();

    tx.send(FeedEvent::Insert(bookmark("A", 1)).to_payload()).await.unwrap();
    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["A"]).await);
}

#[tokio::test]
async fn test_attach_twice_is_rejected() {
    let mut s = session("alice");
    let (feed, _tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();
    assert!(s.is_attached());

    let (other, _other_tx) = ScriptedFeed::new();
    let err = s.attach_feed(&other).await.unwrap_err();
    assert!(matches!(err, FeedError::AlreadyAttached(channel) if channel == "bookmarks-realtime-alice"));
}

#[tokio::test]
async fn test_close_releases_subscription_and_stops_delivery() {
    let mut s = session("alice");
    s.load_snapshot(&StaticLoader(vec![bookmark("A", 1)])).await.unwrap();
    let (feed, tx) = ScriptedFeed::new();
    let torn_down = Arc::clone(&feed.torn_down);
    s.attach_feed(&feed).await.unwrap();

    s.close();
    s.close();
    assert!(s.is_closed());

    for _ in 0..50 {
        if torn_down.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(torn_down.load(Ordering::SeqCst));

    // The receiving side is gone, so nothing more can reach the store.
    let _ = tx.send(FeedEvent::Insert(bookmark("B", 2)).to_payload()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ids(&s.current_view()), vec!["A"]);

    let (again, _again_tx) = ScriptedFeed::new();
    assert!(matches!(s.attach_feed(&again).await, Err(FeedError::Closed(_))));
}

#[tokio::test]
async fn test_local_backend_roundtrip() {
    let backend = LocalBackend::open_in_memory(16).unwrap();
    let existing = backend
        .insert_bookmark(&user("alice"), &NewBookmark::parse("Old", "https://old.test").unwrap())
        .await
        .unwrap();

    let mut s = session("alice");
    s.load_snapshot(&backend).await.unwrap();
    s.attach_feed(&backend).await.unwrap();
    assert_eq!(ids(&s.current_view()), vec![existing.id.as_str()]);

    let added = backend
        .insert_bookmark(&user("alice"), &NewBookmark::parse("New", "https://new.test").unwrap())
        .await
        .unwrap();
    backend
        .insert_bookmark(&user("bob"), &NewBookmark::parse("Other", "https://other.test").unwrap())
        .await
        .unwrap();
    assert!(s.wait_for_view(WAIT, |view| view.len() == 2 && view[0].id == added.id).await);

    backend.delete_bookmark(&user("alice"), &existing.id).await.unwrap();
    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec![added.id.as_str()]).await);
}

#[tokio::test]
async fn test_optimistic_insert_is_not_duplicated_by_feed() {
    let backend = Arc::new(LocalBackend::open_in_memory(16).unwrap());
    let actions = BookmarkActions::new(backend.clone());
    let auth = AuthSession::new("alice", None, "token");

    let mut s = RealtimeSession::new(auth.clone(), &RealtimeSettings::default());
    s.load_snapshot(backend.as_ref()).await.unwrap();
    s.attach_feed(backend.as_ref()).await.unwrap();
    actions.on_created(s.creation_sender());

    let record = actions
        .create_bookmark(Some(&auth), "Rust", "https://rust-lang.org")
        .await
        .unwrap();

    assert!(s.wait_for_view(WAIT, |view| view.iter().any(|b| b.id == record.id)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(s.current_view().as_slice(), &[record]);
}

#[tokio::test]
async fn test_optimistic_inserts_apply_after_feed_closes() {
    let mut s = session("alice");
    let (feed, tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();
    drop(tx);

    s.creation_sender().send(bookmark("A", 1)).unwrap();
    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["A"]).await);
}

#[tokio::test]
async fn test_reconnect_reloads_snapshot_and_resumes_feed() {
    let backend = LocalBackend::open_in_memory(16).unwrap();
    let mut s = session("alice");
    s.load_snapshot(&backend).await.unwrap();
    assert!(s.current_view().is_empty());

    // Written while no feed is attached: only a fresh snapshot can show it.
    let missed = backend
        .insert_bookmark(&user("alice"), &NewBookmark::parse("Missed", "https://missed.test").unwrap())
        .await
        .unwrap();

    s.reconnect(&backend, &backend).await.unwrap();
    assert!(s.is_attached());
    assert_eq!(ids(&s.current_view()), vec![missed.id.as_str()]);

    let live = backend
        .insert_bookmark(&user("alice"), &NewBookmark::parse("Live", "https://live.test").unwrap())
        .await
        .unwrap();
    assert!(s.wait_for_view(WAIT, |view| view.len() == 2 && view[0].id == live.id).await);
}

#[tokio::test]
async fn test_reconnect_keeps_stale_view_when_snapshot_fails() {
    let mut s = session("alice");
    s.load_snapshot(&StaticLoader(vec![bookmark("A", 1)])).await.unwrap();

    let (feed, tx) = ScriptedFeed::new();
    s.reconnect(&FailingLoader, &feed).await.unwrap();
    assert_eq!(ids(&s.current_view()), vec!["A"]);

    tx.send(FeedEvent::Insert(bookmark("B", 2)).to_payload()).await.unwrap();
    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["B", "A"]).await);
}

#[tokio::test]
async fn test_reconnect_after_close_is_rejected() {
    let backend = LocalBackend::open_in_memory(4).unwrap();
    let mut s = session("alice");
    s.close();
    assert!(matches!(
        s.reconnect(&backend, &backend).await,
        Err(FeedError::Closed(_))
    ));
}

#[tokio::test]
async fn test_notify_created_applies_once() {
    let mut s = session("alice");
    let (feed, tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();

    s.notify_created(bookmark("A", 1));
    tx.send(FeedEvent::Insert(bookmark("A", 1)).to_payload()).await.unwrap();
    s.notify_created(bookmark("A", 1));

    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["A"]).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(s.current_view().len(), 1);
}

#[tokio::test]
async fn test_resync_replaces_view_with_fresh_snapshot() {
    let s = session("alice");
    s.load_snapshot(&StaticLoader(vec![bookmark("A", 1)])).await.unwrap();

    s.resync(&StaticLoader(vec![bookmark("C", 3), bookmark("B", 2)]))
        .await
        .unwrap();
    assert_eq!(ids(&s.current_view()), vec!["C", "B"]);

    assert!(s.resync(&FailingLoader).await.is_err());
    assert_eq!(ids(&s.current_view()), vec!["C", "B"]);
}

#[tokio::test]
async fn test_resync_keeps_events_committed_during_fetch() {
    let backend = Arc::new(LocalBackend::open_in_memory(16).unwrap());
    let early = backend
        .insert_bookmark(&user("alice"), &NewBookmark::parse("Early", "https://early.test").unwrap())
        .await
        .unwrap();

    let mut s = session("alice");
    s.load_snapshot(backend.as_ref()).await.unwrap();
    s.attach_feed(backend.as_ref()).await.unwrap();

    s.resync(&StaleLoader { backend: Arc::clone(&backend) }).await.unwrap();

    let stored: Vec<String> = backend.list_for_user("alice").unwrap().into_iter().map(|b| b.id).collect();
    assert_eq!(stored.len(), 2);
    assert!(s.wait_for_view(WAIT, |view| view.len() == 2).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let viewed: Vec<String> = s.current_view().iter().map(|b| b.id.clone()).collect();
    assert_eq!(viewed, stored);
    assert_eq!(viewed[1], early.id);
}

#[tokio::test]
async fn test_resync_failure_applies_held_events_to_current_view() {
    let mut s = session("alice");
    s.load_snapshot(&StaticLoader(vec![bookmark("A", 1)])).await.unwrap();
    let (feed, tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();

    tx.send(FeedEvent::Insert(bookmark("B", 2)).to_payload()).await.unwrap();
    assert!(s.resync(&FailingLoader).await.is_err());

    assert!(s.wait_for_view(WAIT, |view| ids(view) == vec!["B", "A"]).await);
}

#[tokio::test]
async fn test_creation_sender_closes_with_session() {
    let mut s = session("alice");
    let (feed, _tx) = ScriptedFeed::new();
    s.attach_feed(&feed).await.unwrap();
    let sender = s.creation_sender();
    assert!(!sender.is_closed());

    s.close();
    for _ in 0..50 {
        if sender.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(sender.is_closed());
    assert!(sender.send(bookmark("A", 1)).is_err());
    assert!(s.current_view().is_empty());
}

#[tokio::test]
async fn test_closed_creation_sender_is_pruned_by_actions() {
    let backend = Arc::new(LocalBackend::open_in_memory(8).unwrap());
    let actions = BookmarkActions::new(backend.clone());
    let mut s = session("alice");
    s.attach_feed(backend.as_ref()).await.unwrap();
    actions.on_created(s.creation_sender());

    s.close();
    for _ in 0..50 {
        if s.creation_sender().is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    actions
        .create_bookmark(Some(&user("alice")), "A", "https://a.test")
        .await
        .unwrap();
    assert_eq!(actions.listener_count(), 0);
}
