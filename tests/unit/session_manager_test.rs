//! End-to-end session tests against the local backend: bulk load, change
//! stream reconciliation, connection health and teardown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use linkmirror::managers::bulk_loader::{self, LoadOutcome};
use linkmirror::managers::replica_store::{ReplicaSlot, ReplicaStore};
use linkmirror::managers::session_manager::{Session, SessionOptions, StaticIdentity};
use linkmirror::services::backend::{Backend, ChangeFeed};
use linkmirror::services::local_backend::LocalBackend;
use linkmirror::types::bookmark::{Bookmark, NewBookmark};
use linkmirror::types::change::{ChangeKind, ChangeOperation, ChannelStatus, FeedMessage, RawChangeEvent};
use linkmirror::types::errors::{BackendError, SessionError};
use linkmirror::types::health::ConnectionHealth;

const WAIT: Duration = Duration::from_secs(2);

fn options() -> SessionOptions {
    SessionOptions {
        collection: "bookmarks".to_string(),
        subscribe_timeout: Duration::from_secs(5),
    }
}

fn new_bm(owner: &str, title: &str) -> NewBookmark {
    NewBookmark {
        owner_id: owner.to_string(),
        url: format!("https://example.com/{}", title),
        title: title.to_string(),
    }
}

async fn start(backend: &Arc<LocalBackend>, user: &str) -> Session {
    let backend: Arc<dyn Backend> = backend.clone();
    Session::start(backend, &StaticIdentity::signed_in(user), &options())
        .await
        .expect("session starts")
}

/// Waits until `cond` holds, re-checking after every replica revision.
async fn wait_until(session: &Session, cond: impl Fn(&Session) -> bool) {
    let mut revision = session.watch_revision();
    tokio::time::timeout(WAIT, async {
        while !cond(session) {
            if revision.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("condition reached within timeout");
}

async fn wait_health(session: &Session, target: ConnectionHealth) {
    let mut health = session.watch_health();
    tokio::time::timeout(WAIT, health.wait_for(|h| *h == target))
        .await
        .expect("health reached within timeout")
        .expect("health sender alive");
}

fn has(session: &Session, id: &str) -> bool {
    session.records().iter().any(|b| b.id == id)
}

/// Inserts a row and waits for it to arrive, proving every earlier event was processed.
async fn barrier(backend: &LocalBackend, session: &Session) -> Bookmark {
    let marker = backend.insert(new_bm(session.owner_id(), "marker")).await.unwrap();
    wait_until(session, |s| has(s, &marker.id)).await;
    marker
}

// ─── Start ───

#[tokio::test]
async fn test_start_requires_identity() {
    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open_in_memory().unwrap());

    let err = Session::start(backend.clone(), &StaticIdentity::signed_out(), &options())
        .await
        .err()
        .expect("no identity");
    assert!(matches!(err, SessionError::NoIdentity));

    let err = Session::start(backend, &StaticIdentity::signed_in("   "), &options())
        .await
        .err()
        .expect("blank identity");
    assert!(matches!(err, SessionError::NoIdentity));
}

#[tokio::test]
async fn test_start_loads_owner_records_newest_first() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let a = backend.insert(new_bm("u1", "a")).await.unwrap();
    backend.insert(new_bm("u2", "foreign")).await.unwrap();
    let b = backend.insert(new_bm("u1", "b")).await.unwrap();

    let mut session = start(&backend, "u1").await;
    assert_eq!(session.wait_loaded().await.unwrap(), 2);
    assert!(session.is_loaded());

    let ids: Vec<String> = session.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);
    assert_eq!(session.len(), 2);
    assert!(session.channel().starts_with("bookmarks-u1-"));

    wait_health(&session, ConnectionHealth::Connected).await;
    assert_eq!(session.wait_loaded().await.unwrap(), 2);
    session.end().await;
}

#[tokio::test]
async fn test_each_session_gets_its_own_channel() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let first = start(&backend, "u1").await;
    let second = start(&backend, "u1").await;
    assert_ne!(first.channel(), second.channel());
    assert_ne!(first.id(), second.id());
    assert_eq!(backend.channel_count(), 2);
    first.end().await;
    second.end().await;
    assert_eq!(backend.channel_count(), 0);
}

// ─── Reconciliation ───

#[tokio::test]
async fn test_created_record_arrives_through_stream() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();

    let record = session.create("https://example.com", "Example").await.unwrap();
    wait_until(&session, |s| has(s, &record.id)).await;
    assert_eq!(session.records()[0], record);

    session.end().await;
}

#[tokio::test]
async fn test_deleted_record_leaves_replica() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let existing = backend.insert(new_bm("u1", "a")).await.unwrap();
    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();

    session.delete(&existing.id).await.unwrap();
    wait_until(&session, |s| s.is_empty()).await;

    session.end().await;
}

#[tokio::test]
async fn test_remote_update_replaces_in_place() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let a = backend.insert(new_bm("u1", "a")).await.unwrap();
    let b = backend.insert(new_bm("u1", "b")).await.unwrap();
    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();

    backend.update_bookmark(&a.id, None, Some("Renamed")).unwrap();
    wait_until(&session, |s| s.records().iter().any(|r| r.title == "Renamed")).await;

    let ids: Vec<String> = session.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
    session.end().await;
}

#[tokio::test]
async fn test_foreign_owner_events_never_appear() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();

    let foreign = backend.insert(new_bm("u2", "theirs")).await.unwrap();
    backend.update_bookmark(&foreign.id, None, Some("still theirs")).unwrap();
    barrier(&backend, &session).await;

    assert!(!has(&session, &foreign.id));
    assert_eq!(session.len(), 1);
    session.end().await;
}

#[tokio::test]
async fn test_duplicate_and_out_of_order_events_are_harmless() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let existing = backend.insert(new_bm("u1", "a")).await.unwrap();
    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();

    backend.publish_raw(RawChangeEvent::insert(existing.clone()));
    backend.publish_raw(RawChangeEvent::delete("never-existed"));
    let mut ghost = existing.clone();
    ghost.id = "ghost".to_string();
    backend.publish_raw(RawChangeEvent::update(ghost));
    backend.publish_raw(RawChangeEvent {
        kind: ChangeKind::Insert,
        record: None,
        key: None,
    });
    let marker = barrier(&backend, &session).await;

    let ids: Vec<String> = session.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![marker.id.clone(), existing.id.clone()]);

    backend.delete(&existing.id).await.unwrap();
    backend.publish_raw(RawChangeEvent::delete(existing.id.clone()));
    wait_until(&session, |s| !has(s, &existing.id)).await;
    barrier(&backend, &session).await;
    assert_eq!(session.len(), 2);

    session.end().await;
}

#[tokio::test]
async fn test_search_over_live_replica() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    backend
        .insert(NewBookmark {
            owner_id: "u1".to_string(),
            url: "https://a.com".to_string(),
            title: "Example Site".to_string(),
        })
        .await
        .unwrap();
    backend
        .insert(NewBookmark {
            owner_id: "u1".to_string(),
            url: "https://example.org".to_string(),
            title: "Other".to_string(),
        })
        .await
        .unwrap();
    backend.insert(new_bm("u1", "unrelated")).await.unwrap();

    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();

    assert_eq!(session.search("EXAMPLE").len(), 2);
    assert_eq!(session.search("").len(), 3);
    session.end().await;
}

// ─── Connection health ───

#[tokio::test]
async fn test_missing_ack_times_out_to_error() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap().with_manual_ack());
    let opts = SessionOptions {
        collection: "bookmarks".to_string(),
        subscribe_timeout: Duration::from_millis(50),
    };
    let dyn_backend: Arc<dyn Backend> = backend.clone();
    let session = Session::start(dyn_backend, &StaticIdentity::signed_in("u1"), &opts)
        .await
        .unwrap();
    assert_eq!(session.health(), ConnectionHealth::Connecting);

    wait_health(&session, ConnectionHealth::Error).await;

    // Error is terminal, but events still flowing are applied.
    backend
        .push_status(session.channel(), ChannelStatus::Subscribed)
        .unwrap();
    barrier(&backend, &session).await;
    assert_eq!(session.health(), ConnectionHealth::Error);

    session.end().await;
}

#[tokio::test]
async fn test_ack_then_channel_error() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap().with_manual_ack());
    let session = start(&backend, "u1").await;

    backend
        .push_status(session.channel(), ChannelStatus::Subscribed)
        .unwrap();
    wait_health(&session, ConnectionHealth::Connected).await;

    backend
        .push_status(
            session.channel(),
            ChannelStatus::ChannelError {
                message: Some("socket reset".to_string()),
            },
        )
        .unwrap();
    wait_health(&session, ConnectionHealth::Error).await;
    session.end().await;
}

#[tokio::test]
async fn test_closed_status_disconnects() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let session = start(&backend, "u1").await;
    wait_health(&session, ConnectionHealth::Connected).await;

    backend.push_status(session.channel(), ChannelStatus::Closed).unwrap();
    wait_health(&session, ConnectionHealth::Disconnected).await;
    session.end().await;
}

#[tokio::test]
async fn test_backend_dropping_channel_disconnects() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let session = start(&backend, "u1").await;
    wait_health(&session, ConnectionHealth::Connected).await;

    backend.remove_channel(session.channel()).await.unwrap();
    wait_health(&session, ConnectionHealth::Disconnected).await;
    session.end().await;
}

// ─── Teardown ───

#[tokio::test]
async fn test_end_releases_channel_and_reports_disconnected() {
    let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
    let mut session = start(&backend, "u1").await;
    session.wait_loaded().await.unwrap();
    wait_health(&session, ConnectionHealth::Connected).await;

    let health = session.watch_health();
    let revision = session.watch_revision();
    let before = *revision.borrow();
    let channel = session.channel().to_string();
    session.end().await;

    assert_eq!(*health.borrow(), ConnectionHealth::Disconnected);
    assert!(!backend.has_channel(&channel));
    assert_eq!(backend.channel_count(), 0);
    assert!(*revision.borrow() > before, "discarding the replica bumps the revision");

    // Writes after teardown reach no one.
    backend.insert(new_bm("u1", "late")).await.unwrap();
}

#[tokio::test]
async fn test_bulk_load_after_discard_is_stale() {
    let backend = LocalBackend::open_in_memory().unwrap();
    backend.insert(new_bm("u1", "a")).await.unwrap();
    let slot = ReplicaSlot::new(ReplicaStore::new("u1"));
    slot.discard();

    let outcome = bulk_loader::load(&backend, "u1", &slot).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Stale);
    assert!(slot.snapshot().is_empty());
}

#[tokio::test]
async fn test_bulk_load_supersedes_earlier_events() {
    let backend = LocalBackend::open_in_memory().unwrap();
    let stored = backend.insert(new_bm("u1", "a")).await.unwrap();
    let slot = ReplicaSlot::new(ReplicaStore::new("u1"));
    slot.apply(ChangeOperation::Insert(Bookmark {
        id: "early".to_string(),
        owner_id: "u1".to_string(),
        url: "https://early.io".to_string(),
        title: "Early".to_string(),
        created_at: 1,
    }));

    let outcome = bulk_loader::load(&backend, "u1", &slot).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Applied(1));
    assert_eq!(slot.snapshot(), vec![stored]);
}

// ─── Failing backend ───

/// Backend whose reads and writes always fail; subscribing may fail too.
struct FailingBackend {
    fail_subscribe: bool,
    senders: Mutex<Vec<mpsc::Sender<FeedMessage>>>,
}

impl FailingBackend {
    fn new(fail_subscribe: bool) -> Self {
        Self {
            fail_subscribe,
            senders: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Backend for FailingBackend {
    async fn fetch_all(&self, _owner_id: &str) -> Result<Vec<Bookmark>, BackendError> {
        Err(BackendError::NetworkError("offline".to_string()))
    }

    async fn insert(&self, _fields: NewBookmark) -> Result<Bookmark, BackendError> {
        Err(BackendError::NetworkError("offline".to_string()))
    }

    async fn delete(&self, _id: &str) -> Result<(), BackendError> {
        Err(BackendError::NetworkError("offline".to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, BackendError> {
        if self.fail_subscribe {
            return Err(BackendError::NetworkError("no socket".to_string()));
        }
        let (tx, feed) = ChangeFeed::channel(channel, 8);
        tx.try_send(FeedMessage::Status(ChannelStatus::Subscribed)).unwrap();
        self.senders.lock().unwrap().push(tx);
        Ok(feed)
    }

    async fn remove_channel(&self, _channel: &str) -> Result<(), BackendError> {
        self.senders.lock().unwrap().clear();
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_bulk_load_leaves_replica_empty() {
    let backend: Arc<dyn Backend> = Arc::new(FailingBackend::new(false));
    let mut session = Session::start(backend, &StaticIdentity::signed_in("u1"), &options())
        .await
        .unwrap();

    let err = session.wait_loaded().await.unwrap_err();
    assert!(matches!(err, SessionError::LoadFailed(BackendError::NetworkError(_))));
    assert!(!session.is_loaded());
    assert!(session.is_empty());
    assert!(matches!(session.wait_loaded().await.unwrap_err(), SessionError::NotLoaded));

    wait_health(&session, ConnectionHealth::Connected).await;
    assert!(session.create("https://example.com", "Example").await.is_err());
    assert!(session.is_empty());
    session.end().await;
}

#[tokio::test]
async fn test_failed_subscribe_reports_error_health() {
    let backend: Arc<dyn Backend> = Arc::new(FailingBackend::new(true));
    let session = Session::start(backend, &StaticIdentity::signed_in("u1"), &options())
        .await
        .expect("a dead channel does not fail the session");

    assert_eq!(session.health(), ConnectionHealth::Error);
    let health = session.watch_health();
    session.end().await;
    assert_eq!(*health.borrow(), ConnectionHealth::Disconnected);
}
