use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hound::WavReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioFrame, CaptureConfig};
use crate::error::{LiveError, LiveResult};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`
    ///
    /// Channels are averaged; the rate is reduced by integer decimation, so
    /// `target_rate` must divide the file rate (48k/32k/16k for a 16k target).
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<i16>> {
        if self.channels == 0 {
            anyhow::bail!("WAV file has no channels");
        }
        if target_rate == 0 || self.sample_rate < target_rate || self.sample_rate % target_rate != 0
        {
            anyhow::bail!(
                "Cannot convert {}Hz to {}Hz by decimation",
                self.sample_rate,
                target_rate
            );
        }

        let channels = self.channels as usize;
        let mono = self.samples.chunks_exact(channels).map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        });

        let ratio = (self.sample_rate / target_rate) as usize;
        Ok(mono.step_by(ratio).collect())
    }
}

/// Capture backend that replays a WAV file as microphone input
///
/// Blocks of `block_size` samples are delivered at real-time cadence, like a
/// hardware callback would, and capture ends when the file is exhausted.
pub struct FileBackend {
    path: PathBuf,
    config: CaptureConfig,
    samples: Option<Vec<i16>>,
    task: Option<JoinHandle<()>>,
    name: String,
}

impl FileBackend {
    pub fn new(path: PathBuf, config: CaptureConfig) -> Self {
        let name = format!("file:{}", path.display());
        Self {
            path,
            config,
            samples: None,
            task: None,
            name,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn acquire(&mut self) -> LiveResult<()> {
        let path = self.path.clone();
        let target_rate = self.config.target_sample_rate;

        let samples = tokio::task::spawn_blocking(move || {
            AudioFile::open(&path).and_then(|file| file.to_mono(target_rate))
        })
        .await
        .map_err(|e| LiveError::DeviceUnavailable(format!("file loader panicked: {}", e)))?
        .map_err(|e| LiveError::DeviceUnavailable(format!("{:#}", e)))?;

        info!("File capture ready: {} samples from {}", samples.len(), self.name);
        self.samples = Some(samples);
        Ok(())
    }

    async fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(LiveError::DeviceUnavailable("Already capturing".to_string()));
        }

        let samples = self
            .samples
            .take()
            .ok_or_else(|| LiveError::DeviceUnavailable("capture not acquired".to_string()))?;

        let block_size = self.config.block_size.max(1);
        let sample_rate = self.config.target_sample_rate;
        let period = Duration::from_millis(self.config.block_duration_ms().max(1));
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            for (i, block) in samples.chunks(block_size).enumerate() {
                ticker.tick().await;

                let frame = AudioFrame {
                    samples: block.to_vec(),
                    sample_rate,
                    channels: 1,
                    timestamp_ms: (i * block_size) as u64 * 1000 / sample_rate.max(1) as u64,
                };

                if tx.send(frame).await.is_err() {
                    debug!("File capture receiver dropped");
                    return;
                }
            }
            info!("File capture reached end of input");
        });

        self.task = Some(task);
        info!("File capture started ({} per block)", block_size);
        Ok(rx)
    }

    async fn stop(&mut self) -> LiveResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!("File capture dropped while running, aborting");
            task.abort();
        }
    }
}
