//! Live session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Connection lifecycle (disconnected, connecting, connected, error)
//! - Microphone streaming to the live service
//! - Gapless playback of synthesized speech
//! - Transcript assembly into finalized chat turns
//! - Barge-in handling

mod config;
mod scheduler;
mod session;
mod snapshot;
mod state;
mod turns;

pub use config::{SessionConfig, DEFAULT_MODEL, DEFAULT_VOICE};
pub use scheduler::{PlaybackScheduler, Scheduled, INITIAL_CURSOR};
pub use session::LiveSession;
pub use snapshot::SessionSnapshot;
pub use state::ConnectionState;
pub use turns::{ChatTurn, Citation, Role, TurnAssembler};
