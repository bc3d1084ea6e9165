use serde::{Deserialize, Serialize};

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::live::messages::{
    Content, Enabled, GenerationConfig, PrebuiltVoiceConfig, SpeechConfig, Tool, VoiceConfig,
};
use crate::live::Setup;

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Configuration for a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier, with or without the `models/` prefix
    pub model: String,

    /// Prebuilt output voice
    pub voice: String,

    /// System instruction sent at setup
    pub system_instruction: String,

    /// Microphone rate expected by the service (16kHz)
    pub input_sample_rate: u32,

    /// Rate of synthesized audio fragments (24kHz)
    pub output_sample_rate: u32,

    /// Samples per capture block
    /// Default: 2048 (~128ms at 16kHz)
    pub block_size: usize,

    /// Input device processing
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,

    /// Web-search grounding tool
    pub google_search: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: "You are a helpful AI study assistant.".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            block_size: 2048,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            google_search: true,
        }
    }
}

impl SessionConfig {
    /// Model name as the service expects it (`models/<id>`)
    pub fn qualified_model(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Setup message: audio responses, both transcriptions, optional search grounding
    pub fn setup(&self) -> Setup {
        let system_instruction = if self.system_instruction.trim().is_empty() {
            None
        } else {
            Some(Content::text(None, self.system_instruction.clone()))
        };

        let tools = if self.google_search {
            vec![Tool {
                google_search: Some(Enabled {}),
            }]
        } else {
            Vec::new()
        };

        Setup {
            model: self.qualified_model(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction,
            tools,
            input_audio_transcription: Some(Enabled {}),
            output_audio_transcription: Some(Enabled {}),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: self.input_sample_rate,
            target_channels: 1,
            block_size: self.block_size,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.output_sample_rate,
        }
    }
}
