//! HTTP API for driving the tutor from another process
//!
//! - GET /health - Health check
//! - GET /session - Connection state, transcripts and volume
//! - GET /session/turns - Finalized turns
//! - POST /session/connect - Connect and let the tutor greet
//! - POST /session/disconnect - Disconnect
//! - POST /session/text - Send typed text
//! - POST /session/media - Share an image
//! - POST /session/subject - Switch subject
//! - GET /subjects - Available subjects

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
