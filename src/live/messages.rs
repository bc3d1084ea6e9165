//! Live API wire messages.
//!
//! Client and server messages are JSON objects with a single top-level key
//! (`setup`, `realtimeInput`, `clientContent` / `setupComplete`, `serverContent`, ...).
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::session::Citation;

// ============================================================================
// Shared Types
// ============================================================================

/// Inline media payload (base64 data with its MIME type)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

/// Empty object used to switch a feature on (`{}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enabled {}

// ============================================================================
// Client Messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Live media (microphone block or uploaded image)
    pub fn media(blob: Blob) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        })
    }

    /// A complete user turn made of plain text
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text)],
            turn_complete: true,
        })
    }
}

/// First message on a new channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully-qualified model name (`models/...`)
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Enabled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Enabled>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<Enabled>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

// ============================================================================
// Server Messages
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

// ============================================================================
// Semantic Events
// ============================================================================

/// Inbound event after demultiplexing a server message
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    OutputTranscription(String),
    InputTranscription(String),
    Grounding(Vec<Citation>),
    TurnComplete,
    /// Base64 PCM16 fragment of the current assistant turn
    Audio(String),
    Interrupted,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into events, in the order the session must apply them:
    /// output text, input text, citations, turn completion, audio, interruption.
    pub fn into_events(self) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(LiveEvent::OutputTranscription(text));
            }
        }

        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(LiveEvent::InputTranscription(text));
            }
        }

        if let Some(metadata) = content.grounding_metadata {
            let citations: Vec<Citation> = metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| {
                    web.uri.map(|uri| Citation {
                        uri,
                        title: web.title,
                    })
                })
                .collect();
            if !citations.is_empty() {
                events.push(LiveEvent::Grounding(citations));
            }
        }

        if content.turn_complete {
            events.push(LiveEvent::TurnComplete);
        }

        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| blob.mime_type.starts_with("audio/") && !blob.data.is_empty())
                    .map(|blob| LiveEvent::Audio(blob.data)),
            );
        }

        if content.interrupted {
            events.push(LiveEvent::Interrupted);
        }

        events
    }
}
