//! App Core for Smartmarks.
//!
//! Central struct holding the settings, the backing store, the submission
//! flow, and the signed-in user's realtime session.
//!
//! The backing store is the hosted REST project when `backend.url` and
//! `backend.anon_key` are configured, otherwise the local SQLite database.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::managers::bookmark_store::BookmarkView;
use crate::managers::session_manager::{RealtimeSession, RealtimeSessionTrait};
use crate::services::backend::BackingStore;
use crate::services::bookmark_actions::BookmarkActions;
use crate::services::local_backend::LocalBackend;
use crate::services::rest_backend::RestBackend;
use crate::types::bookmark::Bookmark;
use crate::types::errors::{FeedError, SubmitError};
use crate::types::session::AuthSession;
use crate::types::settings::ClientSettings;

/// How long a submitting client waits to see its own change in the view.
const OWN_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of signing in.
#[derive(Debug)]
pub struct SignIn {
    /// Number of bookmarks in the initial view.
    pub bookmarks: usize,
    /// Set when the snapshot could not be loaded; the view starts empty.
    pub snapshot_error: Option<String>,
}

/// Central application struct.
pub struct App {
    pub settings: ClientSettings,
    pub backend: Arc<dyn BackingStore>,
    pub actions: BookmarkActions,
    session: Option<RealtimeSession>,
}

impl App {
    /// Creates a new App over the backing store `settings` select. The
    /// SQLite database at `db_path` is used when no hosted project is
    /// configured.
    pub fn new(db_path: &str, settings: ClientSettings) -> Result<Self, Box<dyn std::error::Error>> {
        let buffer = settings.realtime.event_buffer;
        let backend: Arc<dyn BackingStore> = if RestBackend::is_configured(&settings.backend) {
            info!(url = %settings.backend.url, "using hosted backend");
            Arc::new(RestBackend::new(&settings.backend, buffer)?)
        } else {
            info!(%db_path, "using local backend");
            Arc::new(LocalBackend::open(db_path, buffer)?)
        };
        Ok(Self::with_backend(backend, settings))
    }

    /// Creates an App over an in-memory database.
    pub fn in_memory(settings: ClientSettings) -> Result<Self, Box<dyn std::error::Error>> {
        let backend = Arc::new(LocalBackend::open_in_memory(settings.realtime.event_buffer)?);
        Ok(Self::with_backend(backend, settings))
    }

    /// Creates an App over an already opened backing store.
    pub fn with_backend(backend: Arc<dyn BackingStore>, settings: ClientSettings) -> Self {
        let actions = BookmarkActions::new(Arc::clone(&backend).into_bookmark_backend());
        Self {
            settings,
            backend,
            actions,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&RealtimeSession> {
        self.session.as_ref()
    }

    pub fn auth(&self) -> Option<&AuthSession> {
        self.session.as_ref().map(|s| s.auth())
    }

    /// Starts a realtime session for `auth`, replacing any previous one.
    ///
    /// A failed snapshot is reported in the result but does not abort the
    /// sign-in: the view starts empty and the feed is still attached.
    pub async fn sign_in(&mut self, auth: AuthSession) -> Result<SignIn, FeedError> {
        self.sign_out();

        let mut session = RealtimeSession::new(auth, &self.settings.realtime);
        let snapshot_error = session
            .load_snapshot(self.backend.as_loader())
            .await
            .err()
            .map(|e| e.to_string());
        session.attach_feed(self.backend.as_feed()).await?;
        self.actions.on_created(session.creation_sender());

        let bookmarks = session.current_view().len();
        info!(user_id = %session.auth().user_id, bookmarks, "signed in");
        self.session = Some(session);
        Ok(SignIn {
            bookmarks,
            snapshot_error,
        })
    }

    /// Closes the current session, if any.
    pub fn sign_out(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            info!(user_id = %session.auth().user_id, "signed out");
        }
    }

    /// Current view, or `None` when nobody is signed in.
    pub fn bookmarks(&self) -> Option<BookmarkView> {
        self.session.as_ref().map(|s| s.current_view())
    }

    /// Creates a bookmark and waits briefly until the session shows it.
    pub async fn create_bookmark(&self, title: &str, url: &str) -> Result<Bookmark, SubmitError> {
        let record = self.actions.create_bookmark(self.auth(), title, url).await?;
        if let Some(session) = &self.session {
            let id = record.id.clone();
            session
                .wait_for_view(OWN_WRITE_TIMEOUT, |view| view.iter().any(|b| b.id == id))
                .await;
        }
        Ok(record)
    }

    /// Deletes a bookmark and waits briefly until the session drops it.
    pub async fn delete_bookmark(&self, id: &str) -> Result<bool, SubmitError> {
        let removed = self.actions.delete_bookmark(self.auth(), id).await?;
        if let (true, Some(session)) = (removed, &self.session) {
            session
                .wait_for_view(OWN_WRITE_TIMEOUT, |view| view.iter().all(|b| b.id != id))
                .await;
        }
        Ok(removed)
    }

    /// Resubscribes and reloads the snapshot for the current session.
    pub async fn resync(&mut self) -> Result<usize, FeedError> {
        let backend = Arc::clone(&self.backend);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| FeedError::Closed("no active session".to_string()))?;
        session.reconnect(backend.as_loader(), backend.as_feed()).await?;
        Ok(session.current_view().len())
    }

    /// Shutdown sequence: close the session.
    pub fn shutdown(&mut self) {
        self.sign_out();
    }
}
