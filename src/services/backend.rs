//! Backing store seams for Smartmarks.
//!
//! `BookmarkBackend` is what the submission flow needs; `BackingStore`
//! bundles it with snapshot loading and the change feed so the app can hold
//! either the local SQLite store or the hosted REST store behind one handle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::services::change_feed::ChangeFeed;
use crate::services::snapshot_loader::SnapshotLoader;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::SubmitError;
use crate::types::session::AuthSession;

/// Trait defining the mutations the creation/deletion flow needs.
#[async_trait]
pub trait BookmarkBackend: Send + Sync {
    /// Saves a bookmark owned by `auth`'s user and returns the stored record.
    async fn insert_bookmark(&self, auth: &AuthSession, bookmark: &NewBookmark) -> Result<Bookmark, SubmitError>;
    /// Deletes `id` if it belongs to `auth`'s user. Returns whether a row was removed.
    async fn delete_bookmark(&self, auth: &AuthSession, id: &str) -> Result<bool, SubmitError>;
}

/// A complete backing store: snapshot, change feed and mutations.
pub trait BackingStore: SnapshotLoader + ChangeFeed + BookmarkBackend {
    fn as_loader(&self) -> &dyn SnapshotLoader;
    fn as_feed(&self) -> &dyn ChangeFeed;
    fn into_bookmark_backend(self: Arc<Self>) -> Arc<dyn BookmarkBackend>;
}

impl<T> BackingStore for T
where
    T: SnapshotLoader + ChangeFeed + BookmarkBackend + 'static,
{
    fn as_loader(&self) -> &dyn SnapshotLoader {
        self
    }

    fn as_feed(&self) -> &dyn ChangeFeed {
        self
    }

    fn into_bookmark_backend(self: Arc<Self>) -> Arc<dyn BookmarkBackend> {
        self
    }
}
