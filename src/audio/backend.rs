use std::path::PathBuf;

use tokio::sync::mpsc;

use super::output::{NullPlayback, PlaybackCompletions, PlaybackConfig, PlaybackDevice};
use crate::error::{LiveError, LiveResult};

/// One block of captured audio (16-bit PCM, interleaved)
///
/// Produced by a capture backend and consumed once by the session; never retained.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration of the block in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate expected by the live service
    pub target_sample_rate: u32,
    /// Target channel count (the live service takes mono)
    pub target_channels: u16,
    /// Samples per delivered block (2048 at 16kHz is ~128ms)
    pub block_size: usize,
    /// Requested input processing, honoured where the platform offers it
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureConfig {
    /// Block duration in milliseconds
    pub fn block_duration_ms(&self) -> u64 {
        if self.target_sample_rate == 0 {
            return 0;
        }
        (self.block_size as u64 * 1000) / self.target_sample_rate as u64
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            block_size: 2048,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: stream a WAV file at real-time cadence (testing/demo)
/// - cpal: default microphone (feature `cpal-audio`)
///
/// A backend must release its device when dropped, even if `stop` was never awaited.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Request access to the capture device
    ///
    /// Permission problems surface here as `LiveError::PermissionDenied`.
    async fn acquire(&mut self) -> LiveResult<()>;

    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> LiveResult<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default microphone (requires `cpal-audio`)
    Microphone,
    /// WAV file played into the session as if spoken
    File(PathBuf),
}

/// Audio output type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutput {
    /// Discard synthesized audio, keep timing
    Null,
    /// Default speaker (requires `cpal-audio`)
    Speaker,
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create capture backend based on platform and configuration
    pub fn create(source: AudioSource, config: CaptureConfig) -> LiveResult<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    let backend = super::cpal::CpalMicrophone::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = config;
                    Err(LiveError::DeviceUnavailable(
                        "microphone capture requires the cpal-audio feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => Ok(Box::new(super::file::FileBackend::new(path, config))),
        }
    }

    /// Create playback device for the given output
    pub fn create_output(
        output: AudioOutput,
        config: PlaybackConfig,
        completions: PlaybackCompletions,
    ) -> LiveResult<Box<dyn PlaybackDevice>> {
        match output {
            AudioOutput::Null => Ok(Box::new(NullPlayback::new(config, completions))),

            AudioOutput::Speaker => {
                #[cfg(feature = "cpal-audio")]
                {
                    let device = super::cpal::CpalSpeaker::new(config, completions)?;
                    Ok(Box::new(device))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = (config, completions);
                    Err(LiveError::DeviceUnavailable(
                        "speaker playback requires the cpal-audio feature".to_string(),
                    ))
                }
            }
        }
    }
}

/// Creates the per-session capture and playback devices
///
/// Every `connect` asks for a fresh pair; the session owns them exclusively until teardown.
pub trait AudioDevices: Send + Sync {
    fn capture(&self, config: &CaptureConfig) -> LiveResult<Box<dyn AudioBackend>>;

    fn playback(
        &self,
        config: &PlaybackConfig,
        completions: PlaybackCompletions,
    ) -> LiveResult<Box<dyn PlaybackDevice>>;
}

/// Devices backed by the local machine
#[derive(Debug, Clone)]
pub struct SystemAudio {
    pub source: AudioSource,
    pub output: AudioOutput,
}

impl SystemAudio {
    pub fn new(source: AudioSource, output: AudioOutput) -> Self {
        Self { source, output }
    }
}

impl Default for SystemAudio {
    fn default() -> Self {
        Self {
            source: AudioSource::Microphone,
            output: AudioOutput::Speaker,
        }
    }
}

impl AudioDevices for SystemAudio {
    fn capture(&self, config: &CaptureConfig) -> LiveResult<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.source.clone(), config.clone())
    }

    fn playback(
        &self,
        config: &PlaybackConfig,
        completions: PlaybackCompletions,
    ) -> LiveResult<Box<dyn PlaybackDevice>> {
        AudioBackendFactory::create_output(self.output, config.clone(), completions)
    }
}
