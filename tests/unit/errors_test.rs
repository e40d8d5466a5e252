use linkmirror::types::change::ChangeKind;
use linkmirror::types::errors::*;

// === BackendError Tests ===

#[test]
fn backend_error_display_variants() {
    assert_eq!(
        BackendError::DatabaseError("disk full".to_string()).to_string(),
        "Backend database error: disk full"
    );
    assert_eq!(
        BackendError::NetworkError("connection reset".to_string()).to_string(),
        "Backend network error: connection reset"
    );
    assert_eq!(
        BackendError::Rejected("read-only".to_string()).to_string(),
        "Backend rejected request: read-only"
    );
    assert_eq!(
        BackendError::InvalidPayload("not json".to_string()).to_string(),
        "Invalid backend payload: not json"
    );
    assert_eq!(
        BackendError::ChannelNotFound("bookmarks-u1-x".to_string()).to_string(),
        "Channel not found: bookmarks-u1-x"
    );
}

// === MutationError Tests ===

#[test]
fn mutation_error_display_variants() {
    assert_eq!(
        MutationError::MissingField("title").to_string(),
        "Missing required field: title"
    );
    assert_eq!(
        MutationError::InvalidUrl("not a url".to_string()).to_string(),
        "Invalid URL: not a url"
    );
}

#[test]
fn mutation_error_wraps_backend_error_as_source() {
    let err = MutationError::CreateFailed(BackendError::Rejected("quota".to_string()));
    assert_eq!(
        err.to_string(),
        "Failed to add bookmark: Backend rejected request: quota"
    );
    let source = std::error::Error::source(&err).expect("source should be the backend error");
    assert_eq!(source.to_string(), "Backend rejected request: quota");

    let err = MutationError::DeleteFailed(BackendError::NetworkError("timeout".to_string()));
    assert!(err.to_string().starts_with("Failed to delete bookmark:"));
}

// === EventDecodeError Tests ===

#[test]
fn event_decode_error_display_variants() {
    assert_eq!(
        EventDecodeError::MissingRecord(ChangeKind::Insert).to_string(),
        "Change event 'insert' carries no record"
    );
    assert_eq!(
        EventDecodeError::MissingKey.to_string(),
        "Delete event carries no key"
    );
    assert_eq!(
        EventDecodeError::Malformed("eof".to_string()).to_string(),
        "Malformed change event: eof"
    );
}

// === SessionError Tests ===

#[test]
fn session_error_display_variants() {
    assert_eq!(SessionError::NoIdentity.to_string(), "No authenticated user");
    assert_eq!(
        SessionError::AlreadyActive("u1".to_string()).to_string(),
        "Session already active for user: u1"
    );
    assert_eq!(SessionError::NotActive.to_string(), "No active session");
    assert_eq!(
        SessionError::NotLoaded.to_string(),
        "Collection has not been loaded"
    );
    assert_eq!(
        SessionError::LoadFailed(BackendError::NetworkError("down".to_string())).to_string(),
        "Bulk load failed: Backend network error: down"
    );
}

// === SettingsError Tests ===

#[test]
fn settings_error_display_variants() {
    assert_eq!(
        SettingsError::IoError("denied".to_string()).to_string(),
        "Settings I/O error: denied"
    );
    assert_eq!(
        SettingsError::SerializationError("bad json".to_string()).to_string(),
        "Settings serialization error: bad json"
    );
    assert_eq!(
        SettingsError::InvalidKey("a.b".to_string()).to_string(),
        "Invalid settings key: a.b"
    );
    assert_eq!(
        SettingsError::InvalidValue("x".to_string()).to_string(),
        "Invalid settings value: x"
    );
}

#[test]
fn errors_implement_error_trait() {
    let err: Box<dyn std::error::Error> = Box::new(SessionError::NotActive);
    assert!(err.source().is_none());
}
