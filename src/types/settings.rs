use serde::{Deserialize, Serialize};

/// Top-level settings container, persisted as JSON by the settings engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// Backend table holding the records; also prefixes channel names.
    pub collection: String,
    pub backend: BackendSettings,
    pub realtime: RealtimeSettings,
    pub logging: LoggingSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            collection: "bookmarks".to_string(),
            backend: BackendSettings::default(),
            realtime: RealtimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Which backend service the session talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSettings {
    /// Embedded SQLite store. `None` uses the platform data directory.
    Local { database_path: Option<String> },
    /// Remote REST + streaming change feed.
    Http { base_url: String, api_key: Option<String> },
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings::Local { database_path: None }
    }
}

/// Change-stream subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeSettings {
    /// How long a new channel may stay unacknowledged before it is timed out.
    pub subscribe_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            subscribe_timeout_ms: 10_000,
            channel_capacity: 256,
        }
    }
}

/// Logging settings. `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
