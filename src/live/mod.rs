//! Duplex channel to the remote inference service.

pub mod client;
pub mod gemini;
pub mod messages;

pub use client::{ChannelEvent, LiveChannel, LiveTransport, SendOutcome};
pub use gemini::{GeminiTransport, GEMINI_LIVE_URL};
pub use messages::{Blob, ClientMessage, LiveEvent, ServerMessage, Setup};
