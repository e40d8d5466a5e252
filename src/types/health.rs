use std::fmt;

use serde::{Deserialize, Serialize};

use super::change::ChannelStatus;

/// Liveness of a session's change subscription.
///
/// Starts at `Connecting`. Nothing recovers on its own: once `Error` or
/// `Disconnected` is reached only a new session produces a new subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionHealth {
    /// Returns the state reached after the channel reports `status`.
    pub fn on_status(self, status: &ChannelStatus) -> Self {
        use ConnectionHealth::*;
        match (self, status) {
            (Connecting, ChannelStatus::Subscribed) => Connected,
            (Connecting | Connected, ChannelStatus::ChannelError { .. } | ChannelStatus::TimedOut) => {
                Error
            }
            (Connecting | Connected, ChannelStatus::Closed) => Disconnected,
            (state, _) => state,
        }
    }

    /// Teardown closes the channel whatever state it was in.
    pub fn on_teardown(self) -> Self {
        ConnectionHealth::Disconnected
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionHealth::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionHealth::Connecting => "connecting",
            ConnectionHealth::Connected => "connected",
            ConnectionHealth::Disconnected => "disconnected",
            ConnectionHealth::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
