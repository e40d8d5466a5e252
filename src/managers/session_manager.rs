//! Session Manager for Linkmirror.
//!
//! A [`Session`] is the lifetime context of one authenticated user's mirror:
//! it owns the replica slot, the bulk load, the change subscription and the
//! mutation coordinator. Starting a session kicks off the bulk load and opens
//! the channel; ending it tears the channel down and discards the replica so
//! that nothing still in flight can reach it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::managers::bulk_loader::{self, LoadOutcome};
use crate::managers::change_subscriber::{channel_name, ChangeSubscriber};
use crate::managers::mutation_coordinator::MutationCoordinator;
use crate::managers::replica_store::{ReplicaSlot, ReplicaStore, ReplicaStoreTrait};
use crate::services::backend::Backend;
use crate::services::search_filter::filter_bookmarks_owned;
use crate::types::bookmark::Bookmark;
use crate::types::errors::{BackendError, MutationError, SessionError};
use crate::types::health::ConnectionHealth;
use crate::types::settings::SyncSettings;

/// Supplies the identity of the signed-in user, if any.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Fixed identity, used by the RPC front end and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl SessionProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// Session knobs taken from [`SyncSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub collection: String,
    pub subscribe_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SessionOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            collection: settings.collection.clone(),
            subscribe_timeout: Duration::from_millis(settings.realtime.subscribe_timeout_ms),
        }
    }
}

type LoadHandle = JoinHandle<Result<LoadOutcome, BackendError>>;

/// One user's live mirror.
pub struct Session {
    id: String,
    owner_id: String,
    backend: Arc<dyn Backend>,
    replica: ReplicaSlot,
    subscriber: ChangeSubscriber,
    loader: Option<LoadHandle>,
    mutations: MutationCoordinator,
}

impl Session {
    /// Starts a session for the provider's current user.
    ///
    /// The bulk load is spawned first and the subscription attached right
    /// after, without waiting for the load to finish. Events delivered before
    /// the snapshot lands are folded in and then superseded by it.
    pub async fn start(
        backend: Arc<dyn Backend>,
        provider: &dyn SessionProvider,
        options: &SessionOptions,
    ) -> Result<Self, SessionError> {
        let owner_id = provider
            .current_user()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(SessionError::NoIdentity)?;

        let id = Uuid::new_v4().to_string();
        let replica = ReplicaSlot::new(ReplicaStore::new(owner_id.clone()));

        let loader = bulk_loader::spawn(backend.clone(), owner_id.clone(), replica.clone());
        let channel = channel_name(&options.collection, &owner_id);
        let subscriber = ChangeSubscriber::attach(
            backend.as_ref(),
            channel,
            replica.clone(),
            options.subscribe_timeout,
        )
        .await;

        info!(session_id = %id, owner_id = %owner_id, channel = %subscriber.channel(), "session started");

        let mutations = MutationCoordinator::new(backend.clone(), owner_id.clone());
        Ok(Self {
            id,
            owner_id,
            backend,
            replica,
            subscriber,
            loader: Some(loader),
            mutations,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn channel(&self) -> &str {
        self.subscriber.channel()
    }

    /// Waits for the bulk load and returns the replica length it produced.
    ///
    /// After the first call the load result has been consumed; later calls
    /// report the current length if the load succeeded.
    pub async fn wait_loaded(&mut self) -> Result<usize, SessionError> {
        let Some(handle) = self.loader.take() else {
            return if self.is_loaded() {
                Ok(self.len())
            } else {
                Err(SessionError::NotLoaded)
            };
        };

        match handle.await {
            Ok(Ok(LoadOutcome::Applied(len))) => Ok(len),
            Ok(Ok(LoadOutcome::Stale)) => Err(SessionError::NotActive),
            Ok(Err(e)) => Err(SessionError::LoadFailed(e)),
            Err(e) => {
                error!(session_id = %self.id, error = %e, "bulk load task ended abnormally");
                Err(SessionError::NotLoaded)
            }
        }
    }

    /// Whether the bulk snapshot has been applied.
    pub fn is_loaded(&self) -> bool {
        self.replica.read(|s| s.is_loaded()).unwrap_or(false)
    }

    /// Current records, newest first.
    pub fn records(&self) -> Vec<Bookmark> {
        self.replica.snapshot()
    }

    pub fn len(&self) -> usize {
        self.replica.read(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records whose title or url contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<Bookmark> {
        self.replica
            .read(|s| filter_bookmarks_owned(query, s.records()))
            .unwrap_or_default()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.subscriber.health()
    }

    pub fn watch_health(&self) -> watch::Receiver<ConnectionHealth> {
        self.subscriber.watch_health()
    }

    /// Bumps whenever the visible collection changed.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.replica.watch_revision()
    }

    pub fn replica(&self) -> &ReplicaSlot {
        &self.replica
    }

    /// Requests a new bookmark. The replica picks it up from the channel.
    pub async fn create(&self, url: &str, title: &str) -> Result<Bookmark, MutationError> {
        self.mutations.create(url, title).await
    }

    /// Requests deletion of `id`. The replica drops it when the event arrives.
    pub async fn delete(&self, id: &str) -> Result<(), MutationError> {
        self.mutations.delete(id).await
    }

    /// Tears the session down.
    ///
    /// The subscriber stops and its channel is released before the replica
    /// is discarded. A bulk load still in flight runs to completion and its
    /// snapshot is dropped.
    pub async fn end(self) {
        let Session {
            id,
            owner_id,
            backend,
            replica,
            subscriber,
            loader,
            ..
        } = self;

        subscriber.detach(backend.as_ref()).await;
        replica.discard();
        drop(loader);

        info!(session_id = %id, owner_id = %owner_id, "session ended");
    }
}
