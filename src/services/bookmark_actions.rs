//! Bookmark creation and deletion flow for Smartmarks.
//!
//! `BookmarkActions` validates user input, checks that someone is signed in,
//! and forwards the mutation to a `BookmarkBackend`. A successfully created
//! record is also pushed to every registered creation listener so an open
//! session can show it before the change feed catches up.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::services::backend::BookmarkBackend;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::SubmitError;
use crate::types::session::AuthSession;

/// Receives records created through this flow.
pub type CreationListener = mpsc::UnboundedSender<Bookmark>;

/// Submission handlers for bookmark mutations.
pub struct BookmarkActions {
    backend: Arc<dyn BookmarkBackend>,
    listeners: Mutex<Vec<CreationListener>>,
}

impl BookmarkActions {
    pub fn new(backend: Arc<dyn BookmarkBackend>) -> Self {
        Self {
            backend,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener for created records. Listeners whose receiving
    /// side is gone are dropped on the next notification.
    pub fn on_created(&self, listener: CreationListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Creates a bookmark from raw form input.
    pub async fn create_bookmark(
        &self,
        auth: Option<&AuthSession>,
        title: &str,
        url: &str,
    ) -> Result<Bookmark, SubmitError> {
        let new_bookmark = NewBookmark::parse(title, url)?;
        let auth = auth.ok_or_else(|| {
            SubmitError::Unauthenticated("You must be signed in to add bookmarks.".to_string())
        })?;

        let record = self
            .backend
            .insert_bookmark(auth, &new_bookmark)
            .await?;
        info!(id = %record.id, user_id = %auth.user_id, "bookmark created");

        self.notify_created(&record);
        Ok(record)
    }

    /// Deletes one of the signed-in user's bookmarks.
    ///
    /// Deleting an id the user does not own (or that no longer exists) is not
    /// an error; the return value says whether anything was removed.
    pub async fn delete_bookmark(
        &self,
        auth: Option<&AuthSession>,
        id: &str,
    ) -> Result<bool, SubmitError> {
        let auth = auth.ok_or_else(|| {
            SubmitError::Unauthenticated("You must be signed in to delete bookmarks.".to_string())
        })?;
        let removed = self.backend.delete_bookmark(auth, id).await?;
        if removed {
            info!(%id, user_id = %auth.user_id, "bookmark deleted");
        }
        Ok(removed)
    }

    fn notify_created(&self, record: &Bookmark) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|listener| listener.send(record.clone()).is_ok());
            debug!(listeners = listeners.len(), "creation listeners notified");
        }
    }
}
