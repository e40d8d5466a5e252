//! Bulk Loader for Linkmirror.
//!
//! One-shot fetch of the owner's whole collection into a replica slot.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::managers::replica_store::{ReplicaSlot, ReplicaStoreTrait};
use crate::services::backend::Backend;
use crate::types::errors::BackendError;

/// What happened to a finished bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot replaced the replica contents; holds the resulting length.
    Applied(usize),
    /// The session ended before the fetch resolved; the snapshot was dropped.
    Stale,
}

/// Fetches every record for `owner_id` and initializes the slot with it.
pub async fn load(
    backend: &dyn Backend,
    owner_id: &str,
    slot: &ReplicaSlot,
) -> Result<LoadOutcome, BackendError> {
    let records = match backend.fetch_all(owner_id).await {
        Ok(records) => records,
        Err(e) => {
            error!(owner_id, error = %e, "bulk load failed");
            return Err(e);
        }
    };
    let fetched = records.len();

    let applied = slot.mutate(|store| {
        store.initialize(records);
        true
    });
    match applied {
        Some(_) => {
            let len = slot.read(|s| s.len()).unwrap_or(0);
            info!(owner_id, fetched, len, "bulk load applied");
            Ok(LoadOutcome::Applied(len))
        }
        None => {
            debug!(owner_id, fetched, "bulk load finished after session end, dropped");
            Ok(LoadOutcome::Stale)
        }
    }
}

/// Runs [`load`] as a background task.
pub fn spawn(
    backend: Arc<dyn Backend>,
    owner_id: String,
    slot: ReplicaSlot,
) -> JoinHandle<Result<LoadOutcome, BackendError>> {
    tokio::spawn(async move { load(backend.as_ref(), &owner_id, &slot).await })
}
