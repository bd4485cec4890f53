//! Hosted backing store for Smartmarks.
//!
//! `RestBackend` talks to the hosted project's REST interface: snapshots are
//! a filtered, ordered `GET`, mutations are `POST`/`DELETE` requests scoped to
//! the signed-in user. The hosted push channel is outside this client, so the
//! backend republishes its own committed mutations on a `LocalChangeFeed`;
//! changes made elsewhere show up on the next resync.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use url::Url;

use crate::services::backend::BookmarkBackend;
use crate::services::change_feed::{ChangeFeed, FeedSubscription, LocalChangeFeed};
use crate::services::snapshot_loader::SnapshotLoader;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::{FeedError, SnapshotError, SubmitError};
use crate::types::event::FeedEvent;
use crate::types::session::AuthSession;
use crate::types::settings::BackendSettings;

/// Columns requested from the backend.
const BOOKMARK_COLUMNS: &str = "id,title,url,created_at";

/// Bookmark store backed by the hosted backend's REST interface.
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    table: String,
    feed: LocalChangeFeed,
    /// Serializes mutations so they are republished in commit order.
    writes: AsyncMutex<()>,
}

impl RestBackend {
    /// Whether `settings` carry enough to reach a hosted project.
    pub fn is_configured(settings: &BackendSettings) -> bool {
        !settings.url.trim().is_empty() && !settings.anon_key.trim().is_empty()
    }

    /// Creates a backend from settings.
    ///
    /// # Errors
    /// Returns `SnapshotError::Http` if the HTTP client cannot be built.
    pub fn new(settings: &BackendSettings, feed_buffer: usize) -> Result<Self, SnapshotError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SnapshotError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            anon_key: settings.anon_key.clone(),
            table: settings.table.clone(),
            feed: LocalChangeFeed::new(feed_buffer),
            writes: AsyncMutex::new(()),
        })
    }

    /// The feed this backend republishes its own mutations on.
    pub fn feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    fn table_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))
    }

    /// Builds the query URL for one user's snapshot.
    pub fn snapshot_url(&self, user_id: &str) -> Result<Url, SnapshotError> {
        let mut url = self
            .table_url()
            .map_err(|e| SnapshotError::Http(format!("invalid backend url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("select", BOOKMARK_COLUMNS)
            .append_pair("user_id", &format!("eq.{}", user_id))
            .append_pair("order", "created_at.desc");
        Ok(url)
    }

    /// Builds the URL deleting `id` only when `user_id` owns it.
    pub fn delete_url(&self, user_id: &str, id: &str) -> Result<Url, SubmitError> {
        let mut url = self
            .table_url()
            .map_err(|e| SubmitError::Backend(format!("invalid backend url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", id))
            .append_pair("user_id", &format!("eq.{}", user_id));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, auth: &AuthSession) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(auth.access_token())
            .header("Accept", "application/json")
    }
}

async fn status_error(response: reqwest::Response) -> SubmitError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SubmitError::Backend(format!("Backend returned status {}: {}", status.as_u16(), body))
}

#[async_trait]
impl SnapshotLoader for RestBackend {
    async fn load_snapshot(&self, auth: &AuthSession) -> Result<Vec<Bookmark>, SnapshotError> {
        if auth.access_token().is_empty() {
            debug!(user_id = %auth.user_id, "no access token, snapshot is empty");
            return Ok(Vec::new());
        }

        let url = self.snapshot_url(&auth.user_id)?;
        debug!(user_id = %auth.user_id, "fetching bookmark snapshot");

        let response = self
            .request(Method::GET, url, auth)
            .send()
            .await
            .map_err(|e| SnapshotError::Http(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(user_id = %auth.user_id, "access token rejected, snapshot is empty");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SnapshotError::Status(status.as_u16(), body));
        }

        response
            .json::<Vec<Bookmark>>()
            .await
            .map_err(|e| SnapshotError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BookmarkBackend for RestBackend {
    async fn insert_bookmark(&self, auth: &AuthSession, bookmark: &NewBookmark) -> Result<Bookmark, SubmitError> {
        if auth.access_token().is_empty() {
            return Err(SubmitError::Unauthenticated(
                "You must be signed in to add bookmarks.".to_string(),
            ));
        }
        let url = self
            .table_url()
            .map_err(|e| SubmitError::Backend(format!("invalid backend url: {}", e)))?;

        let _write = self.writes.lock().await;
        let response = self
            .request(Method::POST, url, auth)
            .header("Prefer", "return=representation")
            .json(&json!({
                "user_id": auth.user_id,
                "title": bookmark.title,
                "url": bookmark.url,
            }))
            .send()
            .await
            .map_err(|e| SubmitError::Backend(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SubmitError::Unauthenticated(
                "You must be signed in to add bookmarks.".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let record = response
            .json::<Vec<Bookmark>>()
            .await
            .map_err(|e| SubmitError::Backend(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SubmitError::Backend("Backend returned no row".to_string()))?;

        debug!(id = %record.id, user_id = %auth.user_id, "bookmark stored remotely");
        self.feed
            .publish(&auth.user_id, FeedEvent::Insert(record.clone()).to_payload());
        Ok(record)
    }

    async fn delete_bookmark(&self, auth: &AuthSession, id: &str) -> Result<bool, SubmitError> {
        if auth.access_token().is_empty() {
            return Err(SubmitError::Unauthenticated(
                "You must be signed in to delete bookmarks.".to_string(),
            ));
        }
        let url = self.delete_url(&auth.user_id, id)?;

        let _write = self.writes.lock().await;
        let response = self
            .request(Method::DELETE, url, auth)
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| SubmitError::Backend(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SubmitError::Unauthenticated(
                "You must be signed in to delete bookmarks.".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let removed = response
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| SubmitError::Backend(e.to_string()))?;
        if removed.is_empty() {
            debug!(%id, user_id = %auth.user_id, "delete matched no owned bookmark");
            return Ok(false);
        }

        self.feed.publish(
            &auth.user_id,
            FeedEvent::Delete { id: id.to_string() }.to_payload(),
        );
        Ok(true)
    }
}

#[async_trait]
impl ChangeFeed for RestBackend {
    async fn subscribe(&self, channel: &str, user_id: &str) -> Result<FeedSubscription, FeedError> {
        self.feed.subscribe(channel, user_id).await
    }
}
