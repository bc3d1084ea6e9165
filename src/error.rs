use thiserror::Error;

use crate::session::ConnectionState;

/// Errors surfaced by the live session and its devices.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Microphone access was refused
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Capture or playback device could not be opened
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Socket could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Remote service refused the session setup
    #[error("Channel rejected: {0}")]
    ChannelRejected(String),

    /// Channel ended while an operation needed it
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Operation is not valid from the current connection state
    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        action: &'static str,
        from: ConnectionState,
    },

    /// Connection attempt abandoned by a disconnect
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Malformed inbound payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Playback device refused a fragment
    #[error("Playback error: {0}")]
    Playback(String),

    /// Upload that the live channel cannot carry
    #[error("Unsupported media: {0}")]
    InvalidMedia(String),
}

impl LiveError {
    /// Permission failures are never retried automatically.
    pub fn is_permission(&self) -> bool {
        matches!(self, LiveError::PermissionDenied(_))
    }
}

/// Result type for live session operations.
pub type LiveResult<T> = Result<T, LiveError>;
