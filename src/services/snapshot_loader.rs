//! Snapshot loading for Smartmarks.
//!
//! A snapshot is the full newest-first list of one user's bookmarks, fetched
//! once when a session starts (and again on resync). Both the hosted REST
//! store and the local SQLite store implement [`SnapshotLoader`].

use async_trait::async_trait;

use crate::types::bookmark::Bookmark;
use crate::types::errors::SnapshotError;
use crate::types::session::AuthSession;

/// Trait defining snapshot fetching.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    /// Returns the user's bookmarks sorted by `created_at` descending.
    ///
    /// An unauthenticated caller gets an empty list, not an error.
    async fn load_snapshot(&self, auth: &AuthSession) -> Result<Vec<Bookmark>, SnapshotError>;
}
