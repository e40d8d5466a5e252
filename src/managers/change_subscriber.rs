//! Change Stream Subscriber for Linkmirror.
//!
//! Opens one channel per session, validates every inbound event at the
//! boundary and forwards it to the replica as exactly one apply call. Channel
//! lifecycle reports drive the session's [`ConnectionHealth`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::managers::replica_store::ReplicaSlot;
use crate::services::backend::{Backend, ChangeFeed};
use crate::types::change::{ChangeOperation, ChannelStatus, FeedMessage, RawChangeEvent};
use crate::types::health::ConnectionHealth;

/// Builds a channel name unique to one session mount: `{collection}-{owner}-{unique}`.
pub fn channel_name(collection: &str, owner_id: &str) -> String {
    format!("{}-{}-{}", collection, owner_id, Uuid::new_v4().simple())
}

/// A live subscription feeding one replica slot.
pub struct ChangeSubscriber {
    channel: String,
    health: Arc<watch::Sender<ConnectionHealth>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChangeSubscriber {
    /// Opens `channel` on the backend and starts applying its events to `slot`.
    ///
    /// Health starts at `Connecting`; if no acknowledgement arrives within
    /// `ack_timeout` the channel is treated as timed out. A channel the
    /// backend refuses to open leaves health at `Error` with nothing attached.
    pub async fn attach(
        backend: &dyn Backend,
        channel: String,
        slot: ReplicaSlot,
        ack_timeout: Duration,
    ) -> Self {
        let (health, _) = watch::channel(ConnectionHealth::Connecting);
        let health = Arc::new(health);

        let feed = match backend.subscribe(&channel).await {
            Ok(feed) => feed,
            Err(e) => {
                error!(channel = %channel, error = %e, "subscription failed");
                let status = ChannelStatus::ChannelError {
                    message: Some(e.to_string()),
                };
                transition(&channel, &health, &status);
                return Self {
                    channel,
                    health,
                    shutdown: None,
                    task: None,
                };
            }
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(pump(feed, slot, health.clone(), shutdown_rx, ack_timeout));

        info!(channel = %channel, "subscriber attached");
        Self {
            channel,
            health,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Whether a channel was actually opened.
    pub fn is_attached(&self) -> bool {
        self.task.is_some()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn health(&self) -> ConnectionHealth {
        *self.health.borrow()
    }

    pub fn watch_health(&self) -> watch::Receiver<ConnectionHealth> {
        self.health.subscribe()
    }

    /// Stops applying events, releases the channel and reports `Disconnected`.
    ///
    /// The pump task has exited by the time the channel is released, so no
    /// handler can touch the replica afterwards.
    pub async fn detach(mut self, backend: &dyn Backend) {
        let opened = self.is_attached();
        self.stop().await;
        if opened {
            if let Err(e) = backend.remove_channel(&self.channel).await {
                warn!(channel = %self.channel, error = %e, "failed to release channel");
            }
        }
        self.health.send_modify(|h| *h = h.on_teardown());
        info!(channel = %self.channel, "subscriber detached");
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(channel = %self.channel, error = %e, "subscriber task ended abnormally");
            }
        }
    }
}

impl Drop for ChangeSubscriber {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn pump(
    mut feed: ChangeFeed,
    slot: ReplicaSlot,
    health: Arc<watch::Sender<ConnectionHealth>>,
    mut shutdown: oneshot::Receiver<()>,
    ack_timeout: Duration,
) {
    let ack_deadline = tokio::time::sleep(ack_timeout);
    tokio::pin!(ack_deadline);
    let mut awaiting_ack = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut ack_deadline, if awaiting_ack => {
                awaiting_ack = false;
                transition(feed.name(), &health, &ChannelStatus::TimedOut);
            }
            message = feed.recv() => match message {
                Some(FeedMessage::Status(status)) => {
                    if status == ChannelStatus::Subscribed {
                        awaiting_ack = false;
                    }
                    transition(feed.name(), &health, &status);
                }
                Some(FeedMessage::Change(event)) => dispatch(feed.name(), &slot, event),
                None => {
                    transition(feed.name(), &health, &ChannelStatus::Closed);
                    break;
                }
            },
        }
    }
    debug!(channel = %feed.name(), "subscriber pump stopped");
}

fn transition(channel: &str, health: &watch::Sender<ConnectionHealth>, status: &ChannelStatus) {
    health.send_if_modified(|current| {
        let next = current.on_status(status);
        if next == *current {
            return false;
        }
        info!(channel, from = %current, to = %next, "connection health changed");
        *current = next;
        true
    });
}

fn dispatch(channel: &str, slot: &ReplicaSlot, event: RawChangeEvent) {
    let op = match ChangeOperation::try_from(event) {
        Ok(op) => op,
        Err(e) => {
            warn!(channel, error = %e, "dropping invalid change event");
            return;
        }
    };
    let kind = op.kind();
    match slot.apply(op) {
        Some(changed) => debug!(channel, %kind, changed, "change applied"),
        None => debug!(channel, %kind, "change arrived after session end, dropped"),
    }
}
