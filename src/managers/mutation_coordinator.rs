//! Mutation Coordinator for Linkmirror.
//!
//! Issues remote create and delete requests. The replica is never touched
//! here: a successful mutation becomes visible only when its change event
//! comes back over the session's channel. Failures are returned to the
//! caller and leave the replica as it was.

use std::sync::Arc;

use tracing::{error, info};
use url::Url;

use crate::services::backend::Backend;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::MutationError;

/// Validates a submission, returning the trimmed `(url, title)` to send.
pub fn validate_submission(url: &str, title: &str) -> Result<(String, String), MutationError> {
    let url = url.trim();
    let title = title.trim();
    if url.is_empty() {
        return Err(MutationError::MissingField("url"));
    }
    if title.is_empty() {
        return Err(MutationError::MissingField("title"));
    }
    Url::parse(url).map_err(|e| MutationError::InvalidUrl(format!("{}: {}", url, e)))?;
    Ok((url.to_string(), title.to_string()))
}

/// Sends mutations on behalf of one owner.
#[derive(Clone)]
pub struct MutationCoordinator {
    backend: Arc<dyn Backend>,
    owner_id: String,
}

impl MutationCoordinator {
    pub fn new(backend: Arc<dyn Backend>, owner_id: impl Into<String>) -> Self {
        Self {
            backend,
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Asks the backend to store a new bookmark and returns the stored row.
    pub async fn create(&self, url: &str, title: &str) -> Result<Bookmark, MutationError> {
        let (url, title) = validate_submission(url, title)?;
        let fields = NewBookmark {
            owner_id: self.owner_id.clone(),
            url,
            title,
        };

        match self.backend.insert(fields).await {
            Ok(record) => {
                info!(id = %record.id, owner_id = %self.owner_id, "bookmark created");
                Ok(record)
            }
            Err(e) => {
                error!(owner_id = %self.owner_id, error = %e, "bookmark create failed");
                Err(MutationError::CreateFailed(e))
            }
        }
    }

    /// Asks the backend to delete the bookmark with `id`.
    pub async fn delete(&self, id: &str) -> Result<(), MutationError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(MutationError::MissingField("id"));
        }

        match self.backend.delete(id).await {
            Ok(()) => {
                info!(id, owner_id = %self.owner_id, "bookmark delete requested");
                Ok(())
            }
            Err(e) => {
                error!(id, owner_id = %self.owner_id, error = %e, "bookmark delete failed");
                Err(MutationError::DeleteFailed(e))
            }
        }
    }
}
