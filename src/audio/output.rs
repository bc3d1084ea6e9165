// Playback device abstraction
//
// A device exposes its own clock (seconds since it was opened) and plays
// fragments at absolute positions on that clock. Natural completion of a
// fragment is reported back on the completions channel.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::LiveResult;

/// Handle of one scheduled fragment
///
/// `generation` distinguishes reuses of the same arena slot, so a completion
/// that arrives after its slot was recycled is recognisably stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId {
    pub index: u32,
    pub generation: u32,
}

/// Sender used by devices to report naturally finished fragments
pub type PlaybackCompletions = mpsc::UnboundedSender<PlaybackId>;

/// Configuration for a playback device
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate of the fragments handed to the device (the live service emits 24kHz)
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { sample_rate: 24000 }
    }
}

/// Playback device trait
///
/// All calls are non-blocking. `start` positions a fragment at `at` seconds on the
/// device clock; a fragment whose start is already in the past plays immediately.
pub trait PlaybackDevice: Send {
    /// Get device name for logging
    fn name(&self) -> &str;

    /// Rate expected for `start` samples
    fn sample_rate(&self) -> u32;

    /// Current position of the device clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule mono samples to begin at `at`
    fn start(&mut self, id: PlaybackId, samples: Vec<f32>, at: f64) -> LiveResult<()>;

    /// Stop a fragment early; unknown or finished ids are ignored
    fn stop(&mut self, id: PlaybackId);

    /// Stop everything and release the output
    fn close(&mut self);
}

/// Device that keeps wall-clock timing but discards samples
///
/// Used when no speaker is wanted (headless, HTTP server). Completion is reported
/// at the fragment's scheduled end, so the session sees the same lifecycle as with
/// a real speaker. Must be created inside a tokio runtime.
pub struct NullPlayback {
    config: PlaybackConfig,
    opened_at: Instant,
    completions: PlaybackCompletions,
    pending: HashMap<PlaybackId, JoinHandle<()>>,
}

impl NullPlayback {
    pub fn new(config: PlaybackConfig, completions: PlaybackCompletions) -> Self {
        info!("Null playback device opened ({}Hz)", config.sample_rate);
        Self {
            config,
            opened_at: Instant::now(),
            completions,
            pending: HashMap::new(),
        }
    }
}

impl PlaybackDevice for NullPlayback {
    fn name(&self) -> &str {
        "null"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn start(&mut self, id: PlaybackId, samples: Vec<f32>, at: f64) -> LiveResult<()> {
        self.pending.retain(|_, task| !task.is_finished());

        let duration = samples.len() as f64 / self.config.sample_rate.max(1) as f64;
        let ends_at = self.opened_at + Duration::from_secs_f64((at + duration).max(0.0));
        let completions = self.completions.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(ends_at.into()).await;
            let _ = completions.send(id);
        });
        self.pending.insert(id, task);

        debug!("Null playback: {:?} at {:.3}s for {:.3}s", id, at, duration);
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Some(task) = self.pending.remove(&id) {
            task.abort();
        }
    }

    fn close(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }
}

impl Drop for NullPlayback {
    fn drop(&mut self) {
        self.close();
    }
}
