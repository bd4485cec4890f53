//! Local backing store for Smartmarks.
//!
//! `LocalBackend` stands in for the hosted backend on a single machine: rows
//! live in SQLite via `rusqlite`, every row is owned by a user and only that
//! user can see or delete it, and each committed insert/delete is published
//! on a `LocalChangeFeed` in the same payload shape the hosted feed uses.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::params;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::services::backend::BookmarkBackend;
use crate::services::change_feed::{ChangeFeed, FeedSubscription, LocalChangeFeed};
use crate::services::snapshot_loader::SnapshotLoader;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::{FeedError, SnapshotError, SubmitError};
use crate::types::event::FeedEvent;
use crate::types::session::AuthSession;

/// SQLite-backed bookmark store with an in-process change feed.
pub struct LocalBackend {
    db: Mutex<Database>,
    feed: LocalChangeFeed,
}

impl LocalBackend {
    /// Opens (or creates) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, feed_buffer: usize) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        info!("local backend opened");
        Ok(Self::with_database(db, feed_buffer))
    }

    /// Opens a throwaway in-memory database.
    pub fn open_in_memory(feed_buffer: usize) -> Result<Self, rusqlite::Error> {
        Ok(Self::with_database(Database::open_in_memory()?, feed_buffer))
    }

    fn with_database(db: Database, feed_buffer: usize) -> Self {
        Self {
            db: Mutex::new(db),
            feed: LocalChangeFeed::new(feed_buffer),
        }
    }

    /// The change feed this backend publishes to.
    pub fn feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, String> {
        self.db.lock().map_err(|e| e.to_string())
    }

    /// Lists a user's bookmarks, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Bookmark>, SnapshotError> {
        let db = self.lock().map_err(SnapshotError::Database)?;
        let mut stmt = db
            .connection()
            .prepare(
                "SELECT id, title, url, created_at FROM bookmarks \
                 WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| SnapshotError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| SnapshotError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            let (id, title, url, created_at) =
                row.map_err(|e| SnapshotError::Database(e.to_string()))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| SnapshotError::Decode(format!("created_at for {}: {}", id, e)))?
                .with_timezone(&Utc);
            results.push(Bookmark {
                id,
                title,
                url,
                created_at,
            });
        }
        Ok(results)
    }
}

// Publishing happens under the database lock, so the feed carries changes
// in commit order and `created_at` order matches commit order.
#[async_trait]
impl BookmarkBackend for LocalBackend {
    async fn insert_bookmark(&self, auth: &AuthSession, bookmark: &NewBookmark) -> Result<Bookmark, SubmitError> {
        let user_id = auth.user_id.as_str();
        let db = self.lock().map_err(SubmitError::Backend)?;
        let record = Bookmark {
            id: Uuid::new_v4().to_string(),
            title: bookmark.title.clone(),
            url: bookmark.url.clone(),
            // Stored at microsecond precision; trim so the returned record matches.
            created_at: Utc::now().trunc_subsecs(6),
        };
        db.connection()
            .execute(
                "INSERT INTO bookmarks (id, user_id, title, url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    user_id,
                    record.title,
                    record.url,
                    record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )
            .map_err(|e| SubmitError::Backend(e.to_string()))?;

        debug!(id = %record.id, %user_id, "bookmark stored");
        self.feed
            .publish(user_id, FeedEvent::Insert(record.clone()).to_payload());
        Ok(record)
    }

    async fn delete_bookmark(&self, auth: &AuthSession, id: &str) -> Result<bool, SubmitError> {
        let user_id = auth.user_id.as_str();
        let db = self.lock().map_err(SubmitError::Backend)?;
        let affected = db
            .connection()
            .execute(
                "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| SubmitError::Backend(e.to_string()))?;

        if affected == 0 {
            debug!(%id, %user_id, "delete matched no owned bookmark");
            return Ok(false);
        }

        self.feed.publish(
            user_id,
            FeedEvent::Delete { id: id.to_string() }.to_payload(),
        );
        Ok(true)
    }
}

#[async_trait]
impl SnapshotLoader for LocalBackend {
    async fn load_snapshot(&self, auth: &AuthSession) -> Result<Vec<Bookmark>, SnapshotError> {
        self.list_for_user(&auth.user_id)
    }
}

#[async_trait]
impl ChangeFeed for LocalBackend {
    async fn subscribe(&self, channel: &str, user_id: &str) -> Result<FeedSubscription, FeedError> {
        self.feed.subscribe(channel, user_id).await
    }
}
