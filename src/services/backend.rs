//! Backend service seam.
//!
//! Everything the replica knows about the authoritative store goes through
//! [`Backend`]: the bulk read, the two mutations, and the push channel that
//! reports their effects.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::BackendError;
use crate::types::change::FeedMessage;

/// Receiving end of one subscription channel.
///
/// The feed ends (`recv` yields `None`) when the backend drops the channel;
/// consumers treat that like a `Closed` status.
#[derive(Debug)]
pub struct ChangeFeed {
    channel: String,
    receiver: mpsc::Receiver<FeedMessage>,
}

impl ChangeFeed {
    pub fn new(channel: impl Into<String>, receiver: mpsc::Receiver<FeedMessage>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// Creates a feed together with the sender a backend publishes into.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<FeedMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(name, rx))
    }

    pub fn name(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }
}

/// Operations offered by the authoritative record store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns every record owned by `owner_id`, newest first.
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<Bookmark>, BackendError>;
    /// Stores a new record; the backend assigns `id` and `created_at`.
    async fn insert(&self, fields: NewBookmark) -> Result<Bookmark, BackendError>;
    /// Removes the record with `id`. Removing an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<(), BackendError>;
    /// Opens a channel carrying change events for the whole collection.
    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, BackendError>;
    /// Releases a channel previously opened with [`Backend::subscribe`].
    async fn remove_channel(&self, channel: &str) -> Result<(), BackendError>;
}
