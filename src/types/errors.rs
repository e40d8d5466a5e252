use thiserror::Error;

use super::change::ChangeKind;

// === BackendError ===

/// Errors reported by a backend service implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The local database failed.
    #[error("Backend database error: {0}")]
    DatabaseError(String),
    /// The remote service could not be reached or failed.
    #[error("Backend network error: {0}")]
    NetworkError(String),
    /// The backend refused the request.
    #[error("Backend rejected request: {0}")]
    Rejected(String),
    /// The backend answered with something that could not be decoded.
    #[error("Invalid backend payload: {0}")]
    InvalidPayload(String),
    /// No channel with the given name is open.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

// === MutationError ===

/// Errors surfaced to the caller of a create or delete request.
#[derive(Debug, Error)]
pub enum MutationError {
    /// A required field was empty after trimming.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// The URL is not an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The backend rejected or failed the insert.
    #[error("Failed to add bookmark: {0}")]
    CreateFailed(#[source] BackendError),
    /// The backend rejected or failed the delete.
    #[error("Failed to delete bookmark: {0}")]
    DeleteFailed(#[source] BackendError),
}

// === EventDecodeError ===

/// Inbound change events that fail validation at the channel boundary.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// An insert or update arrived without its row.
    #[error("Change event '{0}' carries no record")]
    MissingRecord(ChangeKind),
    /// A delete arrived without a usable key.
    #[error("Delete event carries no key")]
    MissingKey,
    /// The payload is not a change event at all.
    #[error("Malformed change event: {0}")]
    Malformed(String),
}

// === SessionError ===

/// Errors related to session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session provider has no signed-in user.
    #[error("No authenticated user")]
    NoIdentity,
    /// A session is already running for this user.
    #[error("Session already active for user: {0}")]
    AlreadyActive(String),
    /// There is no active session.
    #[error("No active session")]
    NotActive,
    /// The initial bulk load failed.
    #[error("Bulk load failed: {0}")]
    LoadFailed(#[source] BackendError),
    /// The collection was never loaded (the load failed earlier or was abandoned).
    #[error("Collection has not been loaded")]
    NotLoaded,
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    #[error("Settings I/O error: {0}")]
    IoError(String),
    /// Failed to serialize or deserialize settings.
    #[error("Settings serialization error: {0}")]
    SerializationError(String),
    /// The provided settings key is invalid.
    #[error("Invalid settings key: {0}")]
    InvalidKey(String),
    /// The provided settings value is invalid.
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
}
