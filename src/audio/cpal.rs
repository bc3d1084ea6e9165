//! Microphone capture and speaker playback using CPAL.
//!
//! `cpal::Stream` is not `Send`, so each stream lives on its own thread and is
//! dropped there when the owning backend is stopped or dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::backend::{AudioBackend, AudioFrame, CaptureConfig};
use super::output::{PlaybackCompletions, PlaybackConfig, PlaybackDevice, PlaybackId};
use crate::error::{LiveError, LiveResult};

/// Running stream thread; dropping `stop_tx` ends it
struct StreamThread {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> LiveResult<Self>
    where
        F: FnOnce() -> LiveResult<cpal::Stream> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<LiveResult<()>>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| LiveError::DeviceUnavailable(e.to_string()))?;
                    Ok(stream)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Either an explicit stop or the sender being dropped ends the stream
                let _ = stop_rx.blocking_recv();
                drop(stream);
            })
            .map_err(|e| LiveError::DeviceUnavailable(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LiveError::DeviceUnavailable("audio thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> LiveError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            LiveError::PermissionDenied("input device not available".to_string())
        }
        other => LiveError::DeviceUnavailable(other.to_string()),
    }
}

/// Default microphone, delivered as mono blocks at the target rate
pub struct CpalMicrophone {
    config: CaptureConfig,
    device: Option<cpal::Device>,
    stream: Option<StreamThread>,
    name: String,
}

impl CpalMicrophone {
    pub fn new(config: CaptureConfig) -> LiveResult<Self> {
        if config.echo_cancellation || config.noise_suppression || config.auto_gain_control {
            debug!("Input processing is left to the OS audio stack");
        }
        Ok(Self {
            config,
            device: None,
            stream: None,
            name: "cpal microphone".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalMicrophone {
    async fn acquire(&mut self) -> LiveResult<()> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| LiveError::PermissionDenied("no input device accessible".to_string()))?;

        if let Ok(name) = device.name() {
            self.name = format!("cpal:{}", name);
        }
        info!("Microphone acquired: {}", self.name);
        self.device = Some(device);
        Ok(())
    }

    async fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioFrame>> {
        if self.stream.is_some() {
            return Err(LiveError::DeviceUnavailable("Already capturing".to_string()));
        }

        let device = self
            .device
            .take()
            .ok_or_else(|| LiveError::DeviceUnavailable("capture not acquired".to_string()))?;

        let default_config = device
            .default_input_config()
            .map_err(|e| LiveError::PermissionDenied(e.to_string()))?;
        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let sample_format = default_config.sample_format();
        let stream_config: cpal::StreamConfig = default_config.into();

        let target_rate = self.config.target_sample_rate;
        let block_size = self.config.block_size.max(1);
        let (tx, rx) = mpsc::channel::<AudioFrame>(32);

        let stream = StreamThread::spawn("mic-capture", move || {
            let mut chunker = BlockChunker::new(native_channels, native_rate, target_rate, block_size, tx);
            let err_fn = |err: cpal::StreamError| error!("Input stream error: {}", err);

            match sample_format {
                SampleFormat::F32 => device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let pcm: Vec<i16> = data
                                .iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                                .collect();
                            chunker.push(&pcm);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(map_build_error),
                SampleFormat::I16 => device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| chunker.push(data),
                        err_fn,
                        None,
                    )
                    .map_err(map_build_error),
                fmt => Err(LiveError::DeviceUnavailable(format!(
                    "Unsupported input sample format: {:?}",
                    fmt
                ))),
            }
        })?;

        self.stream = Some(stream);
        info!(
            "Microphone capture started ({}ch/{}Hz native -> {}Hz mono)",
            native_channels, native_rate, target_rate
        );
        Ok(rx)
    }

    async fn stop(&mut self) -> LiveResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Microphone capture stopped");
        }
        self.device = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Converts native callback buffers into fixed-size mono blocks
struct BlockChunker {
    channels: usize,
    ratio: f64,
    position: f64,
    pending: Vec<i16>,
    block_size: usize,
    sample_rate: u32,
    emitted: u64,
    tx: mpsc::Sender<AudioFrame>,
}

impl BlockChunker {
    fn new(
        channels: usize,
        native_rate: u32,
        target_rate: u32,
        block_size: usize,
        tx: mpsc::Sender<AudioFrame>,
    ) -> Self {
        Self {
            channels: channels.max(1),
            ratio: native_rate as f64 / target_rate.max(1) as f64,
            position: 0.0,
            pending: Vec::with_capacity(block_size),
            block_size,
            sample_rate: target_rate,
            emitted: 0,
            tx,
        }
    }

    fn push(&mut self, interleaved: &[i16]) {
        let mono: Vec<i16> = interleaved
            .chunks_exact(self.channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / self.channels as i32) as i16
            })
            .collect();

        // Nearest-sample resampling; position carries over between callbacks
        while (self.position as usize) < mono.len() {
            self.pending.push(mono[self.position as usize]);
            self.position += self.ratio;

            if self.pending.len() == self.block_size {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                let frame = AudioFrame {
                    samples,
                    sample_rate: self.sample_rate,
                    channels: 1,
                    timestamp_ms: self.emitted * 1000 / self.sample_rate.max(1) as u64,
                };
                self.emitted += self.block_size as u64;
                // Realtime thread: never block, drop when the session lags
                if self.tx.try_send(frame).is_err() {
                    debug!("Capture block dropped");
                }
            }
        }
        self.position -= mono.len() as f64;
    }
}

/// Fragment queued on the speaker timeline
struct ScheduledUnit {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
}

/// State shared between the output callback and the session
struct SpeakerTimeline {
    frames_played: AtomicU64,
    units: Mutex<Vec<ScheduledUnit>>,
}

/// Default speaker with a sample-accurate timeline
pub struct CpalSpeaker {
    config: PlaybackConfig,
    device_rate: u32,
    timeline: Arc<SpeakerTimeline>,
    stream: Option<StreamThread>,
    closed: AtomicBool,
}

impl CpalSpeaker {
    pub fn new(config: PlaybackConfig, completions: PlaybackCompletions) -> LiveResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| LiveError::DeviceUnavailable("no output device".to_string()))?;
        let default_config = device
            .default_output_config()
            .map_err(|e| LiveError::DeviceUnavailable(e.to_string()))?;

        if default_config.sample_format() != SampleFormat::F32 {
            return Err(LiveError::DeviceUnavailable(format!(
                "Unsupported output sample format: {:?}",
                default_config.sample_format()
            )));
        }

        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.into();

        let timeline = Arc::new(SpeakerTimeline {
            frames_played: AtomicU64::new(0),
            units: Mutex::new(Vec::new()),
        });

        let callback_timeline = Arc::clone(&timeline);
        let stream = StreamThread::spawn("speaker-playback", move || {
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render(&callback_timeline, data, channels.max(1), &completions);
                    },
                    |err: cpal::StreamError| error!("Output stream error: {}", err),
                    None,
                )
                .map_err(|e| LiveError::DeviceUnavailable(e.to_string()))
        })?;

        info!("Speaker opened ({}Hz, {} channels)", device_rate, channels);

        Ok(Self {
            config,
            device_rate,
            timeline,
            stream: Some(stream),
            closed: AtomicBool::new(false),
        })
    }

    /// Linear resampling from the fragment rate to the device rate
    fn resample(&self, samples: Vec<f32>) -> Vec<f32> {
        if self.config.sample_rate == self.device_rate || samples.is_empty() {
            return samples;
        }
        let ratio = self.config.sample_rate as f64 / self.device_rate as f64;
        let out_len = (samples.len() as f64 / ratio).round() as usize;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = pos as usize;
                let frac = (pos - idx as f64) as f32;
                let a = samples[idx.min(samples.len() - 1)];
                let b = samples[(idx + 1).min(samples.len() - 1)];
                a + (b - a) * frac
            })
            .collect()
    }
}

/// Mix every unit overlapping this buffer, then retire the finished ones
fn render(
    timeline: &SpeakerTimeline,
    data: &mut [f32],
    channels: usize,
    completions: &PlaybackCompletions,
) {
    let frames = (data.len() / channels) as u64;
    let base = timeline.frames_played.load(Ordering::Acquire);
    data.fill(0.0);

    let mut units = timeline.units.lock();
    for unit in units.iter() {
        let len = unit.samples.len() as u64;
        for f in 0..frames {
            let t = base + f;
            if t < unit.start_frame || t >= unit.start_frame + len {
                continue;
            }
            let sample = unit.samples[(t - unit.start_frame) as usize];
            for c in 0..channels {
                let slot = &mut data[f as usize * channels + c];
                *slot = (*slot + sample).clamp(-1.0, 1.0);
            }
        }
    }

    let end = base + frames;
    units.retain(|unit| {
        let done = unit.start_frame + unit.samples.len() as u64 <= end;
        if done {
            let _ = completions.send(unit.id);
        }
        !done
    });
    timeline.frames_played.store(end, Ordering::Release);
}

impl PlaybackDevice for CpalSpeaker {
    fn name(&self) -> &str {
        "cpal speaker"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.timeline.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn start(&mut self, id: PlaybackId, samples: Vec<f32>, at: f64) -> LiveResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LiveError::Playback("speaker closed".to_string()));
        }
        let samples = self.resample(samples);
        let start_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;
        self.timeline.units.lock().push(ScheduledUnit {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.timeline.units.lock().retain(|unit| unit.id != id);
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.timeline.units.lock().clear();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        info!("Speaker closed");
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}
