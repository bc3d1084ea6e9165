use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// A source reference attached to a grounded answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finalized conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

/// Accumulates transcript deltas for the open turn
///
/// Input text is the service's recognition of the learner's speech; output text
/// and citations belong to the assistant's answer.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    input: String,
    output: String,
    citations: Vec<Citation>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&mut self, delta: &str) {
        self.output.push_str(delta);
    }

    pub fn push_input(&mut self, delta: &str) {
        self.input.push_str(delta);
    }

    /// Citations accumulate until the turn completes
    pub fn add_citations(&mut self, citations: impl IntoIterator<Item = Citation>) {
        self.citations.extend(citations);
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Close the open turn
    ///
    /// Emits a user turn if the input is non-blank, then an assistant turn if the
    /// output is non-blank. The assistant timestamp is strictly after the user one.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Vec<ChatTurn> {
        let input = std::mem::take(&mut self.input);
        let output = std::mem::take(&mut self.output);
        let citations = std::mem::take(&mut self.citations);

        let user_text = input.trim();
        let assistant_text = output.trim();
        let mut turns = Vec::new();

        if !user_text.is_empty() {
            let timestamp = self.next_timestamp(now);
            turns.push(ChatTurn {
                id: Uuid::new_v4(),
                role: Role::User,
                text: user_text.to_string(),
                timestamp,
                citations: None,
            });
        }

        if !assistant_text.is_empty() {
            let timestamp = self.next_timestamp(now);
            turns.push(ChatTurn {
                id: Uuid::new_v4(),
                role: Role::Assistant,
                text: assistant_text.to_string(),
                timestamp,
                citations: if citations.is_empty() {
                    None
                } else {
                    Some(citations)
                },
            });
        }

        debug!("Turn finalized: {} chat turns", turns.len());
        turns
    }

    /// Barge-in: drop the partial answer, keep what the learner said
    pub fn interrupt(&mut self) {
        self.output.clear();
        self.citations.clear();
    }

    /// A turn the learner typed; stamped on the same timeline as spoken turns
    pub fn local_user_turn(&mut self, text: &str, now: DateTime<Utc>) -> ChatTurn {
        let timestamp = self.next_timestamp(now);
        ChatTurn {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.to_string(),
            timestamp,
            citations: None,
        }
    }

    /// Clear everything for a new session
    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.citations.clear();
    }

    /// `now`, bumped to at least 1ms after the previous stamp
    fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}
