use std::fmt;

use serde::{Deserialize, Serialize};

use super::bookmark::Bookmark;
use super::errors::EventDecodeError;

/// Kind of row change reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "insert"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// A change notification exactly as it arrives on a channel.
///
/// Nothing about the payload is trusted yet; convert it with
/// [`ChangeOperation::try_from`] before it reaches the replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Bookmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl RawChangeEvent {
    pub fn insert(record: Bookmark) -> Self {
        Self { kind: ChangeKind::Insert, record: Some(record), key: None }
    }

    pub fn update(record: Bookmark) -> Self {
        Self { kind: ChangeKind::Update, record: Some(record), key: None }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self { kind: ChangeKind::Delete, record: None, key: Some(key.into()) }
    }
}

/// A validated change, consumed exactly once by the replica store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert(Bookmark),
    Update(Bookmark),
    Delete(String),
}

impl ChangeOperation {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeOperation::Insert(_) => ChangeKind::Insert,
            ChangeOperation::Update(_) => ChangeKind::Update,
            ChangeOperation::Delete(_) => ChangeKind::Delete,
        }
    }
}

impl TryFrom<RawChangeEvent> for ChangeOperation {
    type Error = EventDecodeError;

    fn try_from(raw: RawChangeEvent) -> Result<Self, Self::Error> {
        match raw.kind {
            ChangeKind::Insert => raw
                .record
                .map(ChangeOperation::Insert)
                .ok_or(EventDecodeError::MissingRecord(ChangeKind::Insert)),
            ChangeKind::Update => raw
                .record
                .map(ChangeOperation::Update)
                .ok_or(EventDecodeError::MissingRecord(ChangeKind::Update)),
            // Deletes usually carry only the key; fall back to the old row if present.
            ChangeKind::Delete => raw
                .key
                .or_else(|| raw.record.map(|r| r.id))
                .filter(|key| !key.is_empty())
                .map(ChangeOperation::Delete)
                .ok_or(EventDecodeError::MissingKey),
        }
    }
}

impl std::str::FromStr for ChangeOperation {
    type Err = EventDecodeError;

    /// Parses and validates a JSON-encoded [`RawChangeEvent`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawChangeEvent =
            serde_json::from_str(s).map_err(|e| EventDecodeError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Lifecycle status reported for a subscription channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    TimedOut,
    Closed,
}

/// One message on a change feed: either a status transition or a row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum FeedMessage {
    Status(ChannelStatus),
    Change(RawChangeEvent),
}
