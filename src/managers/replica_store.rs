//! Replica Store for Linkmirror.
//!
//! Holds the in-memory, ordered mirror of one user's bookmarks and folds bulk
//! snapshots and change operations into it. Every apply is idempotent and
//! tolerant of duplicate or out-of-order delivery: conditions that look like
//! errors (foreign owner, unknown id, duplicate insert) collapse to no-ops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use crate::types::bookmark::Bookmark;
use crate::types::change::ChangeOperation;

/// Trait defining replica apply operations.
///
/// Each `apply_*` returns whether the collection changed.
pub trait ReplicaStoreTrait {
    fn initialize(&mut self, records: Vec<Bookmark>);
    fn apply_insert(&mut self, record: Bookmark) -> bool;
    fn apply_update(&mut self, record: Bookmark) -> bool;
    fn apply_delete(&mut self, id: &str) -> bool;
    fn apply(&mut self, op: ChangeOperation) -> bool;
    fn records(&self) -> &[Bookmark];
}

/// Ordered collection of one owner's bookmarks, keyed by id.
#[derive(Debug, Clone)]
pub struct ReplicaStore {
    owner_id: String,
    records: Vec<Bookmark>,
    loaded: bool,
}

impl ReplicaStore {
    /// Creates an empty store for `owner_id`.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            records: Vec::new(),
            loaded: false,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Whether a bulk snapshot has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.records.iter().find(|b| b.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|b| b.id == id)
    }

    fn owns(&self, record: &Bookmark) -> bool {
        record.owner_id == self.owner_id
    }
}

impl ReplicaStoreTrait for ReplicaStore {
    /// Replaces the whole collection, newest `created_at` first.
    ///
    /// Foreign-owned rows are dropped and only the first row per id is kept.
    fn initialize(&mut self, records: Vec<Bookmark>) {
        let mut seen = HashSet::new();
        let mut records: Vec<Bookmark> = records
            .into_iter()
            .filter(|r| r.owner_id == self.owner_id)
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.records = records;
        self.loaded = true;
    }

    /// Puts a new record at the head. No re-sort by `created_at` happens here.
    fn apply_insert(&mut self, record: Bookmark) -> bool {
        if !self.owns(&record) {
            trace!(id = %record.id, "insert for foreign owner ignored");
            return false;
        }
        if self.contains(&record.id) {
            trace!(id = %record.id, "duplicate insert ignored");
            return false;
        }
        self.records.insert(0, record);
        true
    }

    /// Replaces a known record in place, keeping its position.
    fn apply_update(&mut self, record: Bookmark) -> bool {
        if !self.owns(&record) {
            trace!(id = %record.id, "update for foreign owner ignored");
            return false;
        }
        match self.position(&record.id) {
            Some(idx) => {
                if self.records[idx] == record {
                    return false;
                }
                self.records[idx] = record;
                true
            }
            None => {
                trace!(id = %record.id, "update for unknown id ignored");
                false
            }
        }
    }

    fn apply_delete(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => {
                trace!(id, "delete for unknown id ignored");
                false
            }
        }
    }

    fn apply(&mut self, op: ChangeOperation) -> bool {
        match op {
            ChangeOperation::Insert(record) => self.apply_insert(record),
            ChangeOperation::Update(record) => self.apply_update(record),
            ChangeOperation::Delete(id) => self.apply_delete(&id),
        }
    }

    fn records(&self) -> &[Bookmark] {
        &self.records
    }
}

/// Session-scoped handle to a [`ReplicaStore`].
///
/// Clones share the same store. Once [`ReplicaSlot::discard`] has run, every
/// access finds nothing and late results (a bulk load finishing after the
/// session ended, an event still in flight) are dropped. A revision counter
/// bumps on every change that actually altered the collection.
#[derive(Debug, Clone)]
pub struct ReplicaSlot {
    store: Arc<Mutex<Option<ReplicaStore>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl ReplicaSlot {
    pub fn new(store: ReplicaStore) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store: Arc::new(Mutex::new(Some(store))),
            revision: Arc::new(revision),
        }
    }

    /// Runs `f` against the live store; `None` once the slot was discarded.
    pub fn read<R>(&self, f: impl FnOnce(&ReplicaStore) -> R) -> Option<R> {
        let guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }

    /// Runs a mutation that reports whether it changed anything.
    ///
    /// Returns `None` if the slot was discarded.
    pub fn mutate(&self, f: impl FnOnce(&mut ReplicaStore) -> bool) -> Option<bool> {
        let changed = {
            let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            guard.as_mut().map(f)
        };
        if changed == Some(true) {
            self.revision.send_modify(|r| *r += 1);
        }
        changed
    }

    /// Applies one operation; `None` if the slot was discarded.
    pub fn apply(&self, op: ChangeOperation) -> Option<bool> {
        self.mutate(|store| store.apply(op))
    }

    /// Drops the store. Later reads and mutations are no-ops.
    pub fn discard(&self) -> Option<ReplicaStore> {
        let taken = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            self.revision.send_modify(|r| *r += 1);
        }
        taken
    }

    pub fn is_live(&self) -> bool {
        self.read(|_| ()).is_some()
    }

    /// Copy of the current records, empty once discarded.
    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.read(|s| s.records().to_vec()).unwrap_or_default()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Subscribes to revision bumps.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
