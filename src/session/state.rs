use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the connection to the live service
///
/// `disconnected -> connecting -> connected -> {disconnected, error}`;
/// `error -> disconnected` (reset) or `error -> connecting` (retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// A new connection attempt may only start from here
    pub fn can_connect(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }

    /// Whether audio resources may be held in this state
    pub fn holds_resources(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
