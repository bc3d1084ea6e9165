use serde::{Deserialize, Serialize};

use super::state::ConnectionState;
use super::turns::ChatTurn;

/// What the presentation layer renders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current connection state
    pub connection_state: ConnectionState,

    /// Finalized turns, oldest first
    pub turns: Vec<ChatTurn>,

    /// Learner speech recognized so far in the open turn
    pub in_progress_input: String,

    /// Assistant answer transcribed so far in the open turn
    pub in_progress_output: String,

    /// Microphone level, 0 to 100
    pub volume: f32,
}
