use anyhow::{Context, Result};
use serde::Deserialize;

use crate::live::GEMINI_LIVE_URL;
use crate::session::{SessionConfig, DEFAULT_MODEL, DEFAULT_VOICE};
use crate::tutor::Subject;

/// Environment overrides, e.g. `TUTOR_LIVE__LIVE__API_KEY`
pub const ENV_PREFIX: &str = "TUTOR_LIVE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub tutor: TutorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_setup_timeout")]
    pub setup_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub google_search: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            input_sample_rate: session.input_sample_rate,
            output_sample_rate: session.output_sample_rate,
            block_size: session.block_size,
            echo_cancellation: session.echo_cancellation,
            noise_suppression: session.noise_suppression,
            auto_gain_control: session.auto_gain_control,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TutorConfig {
    #[serde(default)]
    pub default_subject: Subject,
}

fn default_endpoint() -> String {
    GEMINI_LIVE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_setup_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load a config file (extension optional) with environment overrides on top
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Runtime settings for a live session; the system instruction is set by the tutor
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            block_size: self.audio.block_size,
            echo_cancellation: self.audio.echo_cancellation,
            noise_suppression: self.audio.noise_suppression,
            auto_gain_control: self.audio.auto_gain_control,
            google_search: self.live.google_search,
            ..SessionConfig::default()
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}
