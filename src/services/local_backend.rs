//! Local backend service for Linkmirror.
//!
//! Implements [`Backend`] on top of the embedded SQLite database. Every
//! committed change is fanned out to all open channels, whoever owns the
//! row, the same way a table-scoped push subscription behaves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::params;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::services::backend::{Backend, ChangeFeed};
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::change::{ChannelStatus, FeedMessage, RawChangeEvent};
use crate::types::errors::BackendError;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// SQLite-backed authoritative store with an in-process change stream.
pub struct LocalBackend {
    db: Mutex<Database>,
    channels: Mutex<HashMap<String, mpsc::Sender<FeedMessage>>>,
    capacity: usize,
    auto_ack: bool,
    writable: AtomicBool,
}

impl LocalBackend {
    /// Wraps an already-migrated database.
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            channels: Mutex::new(HashMap::new()),
            capacity: DEFAULT_CHANNEL_CAPACITY,
            auto_ack: true,
            writable: AtomicBool::new(true),
        }
    }

    /// Opens (or creates) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let db = Database::open(path).map_err(|e| BackendError::DatabaseError(e.to_string()))?;
        Ok(Self::new(db))
    }

    /// Opens a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let db = Database::open_in_memory().map_err(|e| BackendError::DatabaseError(e.to_string()))?;
        Ok(Self::new(db))
    }

    /// Sets how many undelivered messages a channel may buffer before it is dropped.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// New channels are not acknowledged automatically; use [`Self::push_status`].
    pub fn with_manual_ack(mut self) -> Self {
        self.auto_ack = false;
        self
    }

    /// When `false`, inserts, updates and deletes are rejected.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Number of channels currently open.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels
            .lock()
            .map(|c| c.contains_key(name))
            .unwrap_or(false)
    }

    /// Updates the url and/or title of a stored bookmark, as another device would.
    pub fn update_bookmark(
        &self,
        id: &str,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<Bookmark, BackendError> {
        self.ensure_writable()?;
        let record = {
            let db = self.lock_db()?;
            let conn = db.connection();
            let affected = match (url, title) {
                (Some(u), Some(t)) => conn.execute(
                    "UPDATE bookmarks SET url = ?1, title = ?2 WHERE id = ?3",
                    params![u, t, id],
                ),
                (Some(u), None) => conn.execute(
                    "UPDATE bookmarks SET url = ?1 WHERE id = ?2",
                    params![u, id],
                ),
                (None, Some(t)) => conn.execute(
                    "UPDATE bookmarks SET title = ?1 WHERE id = ?2",
                    params![t, id],
                ),
                (None, None) => conn.execute("UPDATE bookmarks SET id = id WHERE id = ?1", params![id]),
            }
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?;

            if affected == 0 {
                return Err(BackendError::Rejected(format!("no bookmark with id {}", id)));
            }

            conn.query_row(
                "SELECT id, owner_id, url, title, created_at FROM bookmarks WHERE id = ?1",
                params![id],
                Self::row_to_bookmark,
            )
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?
        };

        self.broadcast(FeedMessage::Change(RawChangeEvent::update(record.clone())));
        Ok(record)
    }

    /// Delivers an arbitrary change event to every open channel without touching storage.
    ///
    /// Useful for replaying duplicates or out-of-order notifications.
    pub fn publish_raw(&self, event: RawChangeEvent) {
        self.broadcast(FeedMessage::Change(event));
    }

    /// Reports a lifecycle status on one channel.
    pub fn push_status(&self, channel: &str, status: ChannelStatus) -> Result<(), BackendError> {
        let sender = {
            let channels = self
                .channels
                .lock()
                .map_err(|e| BackendError::DatabaseError(e.to_string()))?;
            channels
                .get(channel)
                .cloned()
                .ok_or_else(|| BackendError::ChannelNotFound(channel.to_string()))?
        };
        sender
            .try_send(FeedMessage::Status(status))
            .map_err(|e| BackendError::NetworkError(e.to_string()))
    }

    fn ensure_writable(&self) -> Result<(), BackendError> {
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Rejected("collection is read-only".to_string()))
        }
    }

    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Database>, BackendError> {
        self.db
            .lock()
            .map_err(|e| BackendError::DatabaseError(e.to_string()))
    }

    fn broadcast(&self, message: FeedMessage) {
        let Ok(mut channels) = self.channels.lock() else {
            warn!("channel registry poisoned, dropping change event");
            return;
        };
        channels.retain(|name, sender| match sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(channel = %name, "channel buffer full, dropping subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(channel = %name, "subscriber went away, removing channel");
                false
            }
        });
    }

    /// Returns the current UNIX timestamp in milliseconds.
    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn row_to_bookmark(row: &rusqlite::Row) -> rusqlite::Result<Bookmark> {
        Ok(Bookmark {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<Bookmark>, BackendError> {
        let db = self.lock_db()?;
        let mut stmt = db
            .connection()
            .prepare(
                "SELECT id, owner_id, url, title, created_at FROM bookmarks \
                 WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?;

        let rows = stmt
            .query_map(params![owner_id], Self::row_to_bookmark)
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| BackendError::DatabaseError(e.to_string()))?);
        }
        Ok(results)
    }

    async fn insert(&self, fields: NewBookmark) -> Result<Bookmark, BackendError> {
        self.ensure_writable()?;
        if fields.owner_id.is_empty() {
            return Err(BackendError::Rejected("owner_id is required".to_string()));
        }

        let record = Bookmark {
            id: Uuid::new_v4().to_string(),
            owner_id: fields.owner_id,
            url: fields.url,
            title: fields.title,
            created_at: Self::now_millis(),
        };

        self.lock_db()?
            .connection()
            .execute(
                "INSERT INTO bookmarks (id, owner_id, url, title, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![record.id, record.owner_id, record.url, record.title, record.created_at],
            )
            .map_err(|e| BackendError::Rejected(e.to_string()))?;

        self.broadcast(FeedMessage::Change(RawChangeEvent::insert(record.clone())));
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.ensure_writable()?;
        let affected = self
            .lock_db()?
            .connection()
            .execute("DELETE FROM bookmarks WHERE id = ?1", params![id])
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?;

        if affected > 0 {
            self.broadcast(FeedMessage::Change(RawChangeEvent::delete(id)));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, BackendError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?;
        if channels.contains_key(channel) {
            return Err(BackendError::Rejected(format!("channel already open: {}", channel)));
        }

        let (tx, feed) = ChangeFeed::channel(channel, self.capacity);
        if self.auto_ack {
            // A fresh channel always has room for its acknowledgement.
            let _ = tx.try_send(FeedMessage::Status(ChannelStatus::Subscribed));
        }
        channels.insert(channel.to_string(), tx);
        info!(channel, "channel opened");
        Ok(feed)
    }

    async fn remove_channel(&self, channel: &str) -> Result<(), BackendError> {
        let removed = self
            .channels
            .lock()
            .map_err(|e| BackendError::DatabaseError(e.to_string()))?
            .remove(channel);
        match removed {
            Some(_) => {
                info!(channel, "channel released");
                Ok(())
            }
            None => Err(BackendError::ChannelNotFound(channel.to_string())),
        }
    }
}
