//! Bookmark store for Smartmarks.
//!
//! Implements `BookmarkStoreTrait`: the in-memory, newest-first list of one
//! user's bookmarks, reconciled from an initial snapshot and a stream of
//! insert/delete events.
//!
//! The list lives inside a `tokio::sync::watch` channel as an
//! `Arc<Vec<Bookmark>>`. Every mutation runs under the channel's write lock
//! and goes through `Arc::make_mut`, so a reader holding an older view keeps
//! it intact while the store moves on. Receivers are woken only when the
//! list actually changed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::types::bookmark::Bookmark;
use crate::types::event::FeedEvent;

/// Shared, immutable view of the bookmark list.
pub type BookmarkView = Arc<Vec<Bookmark>>;

/// Trait defining the reconciliation operations.
pub trait BookmarkStoreTrait {
    fn initialize(&self, snapshot: Vec<Bookmark>);
    fn apply_insert(&self, record: Bookmark) -> bool;
    fn apply_delete(&self, id: &str) -> bool;
    fn apply_event(&self, event: FeedEvent) -> bool;
    fn current_view(&self) -> BookmarkView;
}

/// Reconciliation store for a single user session.
pub struct BookmarkStore {
    view: watch::Sender<BookmarkView>,
    initialized: AtomicBool,
}

impl BookmarkStore {
    /// Creates an empty, uninitialized store.
    pub fn new() -> Self {
        let (view, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            view,
            initialized: AtomicBool::new(false),
        }
    }

    /// Returns a receiver that is notified whenever the list changes.
    pub fn subscribe(&self) -> watch::Receiver<BookmarkView> {
        self.view.subscribe()
    }

    /// Whether a snapshot has been applied yet.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.view.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.borrow().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.view.borrow().iter().any(|b| b.id == id)
    }
}

impl Default for BookmarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookmarkStoreTrait for BookmarkStore {
    /// Replaces the whole list with `snapshot`.
    ///
    /// The snapshot is trusted to be newest-first and free of duplicate ids.
    fn initialize(&self, snapshot: Vec<Bookmark>) {
        debug!(count = snapshot.len(), "initializing bookmark store");
        self.view.send_replace(Arc::new(snapshot));
        self.initialized.store(true, Ordering::Release);
    }

    /// Prepends `record` unless a record with the same id is already present.
    ///
    /// Returns `true` if the list changed.
    fn apply_insert(&self, record: Bookmark) -> bool {
        let id = record.id.clone();
        let changed = self.view.send_if_modified(|view| {
            if view.iter().any(|b| b.id == record.id) {
                return false;
            }
            Arc::make_mut(view).insert(0, record);
            true
        });
        if changed {
            debug!(%id, "bookmark inserted");
        } else {
            debug!(%id, "duplicate insert ignored");
        }
        changed
    }

    /// Removes the record with `id` if present.
    ///
    /// Returns `true` if the list changed.
    fn apply_delete(&self, id: &str) -> bool {
        let changed = self.view.send_if_modified(|view| {
            match view.iter().position(|b| b.id == id) {
                Some(index) => {
                    Arc::make_mut(view).remove(index);
                    true
                }
                None => false,
            }
        });
        if changed {
            debug!(%id, "bookmark removed");
        } else {
            debug!(%id, "delete for unknown id ignored");
        }
        changed
    }

    fn apply_event(&self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Insert(record) => self.apply_insert(record),
            FeedEvent::Delete { id } => self.apply_delete(&id),
        }
    }

    /// Returns the current list. Cheap: clones the `Arc`, not the records.
    fn current_view(&self) -> BookmarkView {
        self.view.borrow().clone()
    }
}
