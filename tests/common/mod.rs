// Test doubles for the live session: a playback device on a manually driven
// clock, an in-memory transport and a scripted capture backend.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tutor_live::audio::{
    AudioBackend, AudioDevices, AudioFrame, CaptureConfig, PlaybackCompletions, PlaybackConfig,
    PlaybackDevice, PlaybackId,
};
use tutor_live::live::client::{ChannelEvent, INBOUND_CAPACITY, OUTBOUND_CAPACITY};
use tutor_live::live::messages::{ServerMessage, Setup};
use tutor_live::live::{ClientMessage, LiveChannel, LiveTransport};
use tutor_live::session::{ConnectionState, LiveSession, SessionSnapshot};
use tutor_live::{LiveError, LiveResult};

pub const WAIT: Duration = Duration::from_secs(2);

/// Base64 PCM16 silence lasting `seconds` at `sample_rate`
pub fn pcm_base64(seconds: f64, sample_rate: u32) -> String {
    let samples = (seconds * sample_rate as f64).round() as usize;
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}

pub fn frame(samples: Vec<i16>, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: 16000,
        channels: 1,
        timestamp_ms,
    }
}

pub fn server_message(json: &str) -> ServerMessage {
    serde_json::from_str(json).unwrap()
}

// ============================================================================
// Playback
// ============================================================================

/// What a playback device was asked to do
#[derive(Debug, Default)]
pub struct PlaybackLog {
    /// (id, sample count, start time)
    pub started: Vec<(PlaybackId, usize, f64)>,
    pub stopped: Vec<PlaybackId>,
    pub closed: bool,
    /// Whether an earlier device had been closed when each device was opened
    pub closed_at_open: Vec<bool>,
}

/// Clock and log shared between a test and its playback devices
#[derive(Clone, Default)]
pub struct ManualClock {
    time: Arc<Mutex<f64>>,
    log: Arc<Mutex<PlaybackLog>>,
    refuse: Arc<AtomicBool>,
    completions: Arc<Mutex<Option<PlaybackCompletions>>>,
}

impl ManualClock {
    pub fn set(&self, time: f64) {
        *self.time.lock() = time;
    }

    pub fn now(&self) -> f64 {
        *self.time.lock()
    }

    /// Make the device reject every fragment
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<(PlaybackId, usize, f64)> {
        self.log.lock().started.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.log.lock().stopped.clone()
    }

    pub fn closed(&self) -> bool {
        self.log.lock().closed
    }

    pub fn closed_at_open(&self) -> Vec<bool> {
        self.log.lock().closed_at_open.clone()
    }

    /// Report a fragment as finished, as the hardware would
    pub fn finish(&self, id: PlaybackId) {
        if let Some(tx) = self.completions.lock().as_ref() {
            let _ = tx.send(id);
        }
    }

    pub fn device(&self, sample_rate: u32) -> ManualClockPlayback {
        {
            let mut log = self.log.lock();
            let closed = log.closed;
            log.closed_at_open.push(closed);
        }
        ManualClockPlayback {
            clock: self.clone(),
            sample_rate,
        }
    }
}

pub struct ManualClockPlayback {
    clock: ManualClock,
    sample_rate: u32,
}

impl PlaybackDevice for ManualClockPlayback {
    fn name(&self) -> &str {
        "ManualClock"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn start(&mut self, id: PlaybackId, samples: Vec<f32>, at: f64) -> LiveResult<()> {
        if self.clock.refuse.load(Ordering::SeqCst) {
            return Err(LiveError::Playback("device refused".to_string()));
        }
        self.clock.log.lock().started.push((id, samples.len(), at));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.clock.log.lock().stopped.push(id);
    }

    fn close(&mut self) {
        self.clock.log.lock().closed = true;
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Observes capture backends created by `MockDevices`
#[derive(Clone, Default)]
pub struct CaptureProbe {
    pub acquired: Arc<AtomicUsize>,
    pub started: Arc<AtomicUsize>,
    /// Stopped explicitly or dropped
    pub released: Arc<AtomicUsize>,
    /// Release count seen by each successful acquire
    pub releases_at_acquire: Arc<Mutex<Vec<usize>>>,
}

impl CaptureProbe {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn releases_at_acquire(&self) -> Vec<usize> {
        self.releases_at_acquire.lock().clone()
    }
}

/// Capture backend that delivers a fixed list of frames, then stays open
pub struct ScriptedCapture {
    frames: Vec<AudioFrame>,
    deny: bool,
    probe: CaptureProbe,
    start_gate: Option<Arc<Notify>>,
    acquired: bool,
    sender: Option<mpsc::Sender<AudioFrame>>,
}

impl ScriptedCapture {
    pub fn new(frames: Vec<AudioFrame>, deny: bool, probe: CaptureProbe) -> Self {
        Self {
            frames,
            deny,
            probe,
            start_gate: None,
            acquired: false,
            sender: None,
        }
    }

    fn release(&mut self) {
        if self.acquired {
            self.acquired = false;
            self.sender = None;
            self.probe.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedCapture {
    async fn acquire(&mut self) -> LiveResult<()> {
        if self.deny {
            return Err(LiveError::PermissionDenied("microphone blocked".to_string()));
        }
        self.acquired = true;
        self.probe
            .releases_at_acquire
            .lock()
            .push(self.probe.released());
        self.probe.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioFrame>> {
        self.probe.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.start_gate {
            gate.notified().await;
        }

        let (tx, rx) = mpsc::channel(self.frames.len() + 1);
        for frame in self.frames.drain(..) {
            let _ = tx.try_send(frame);
        }
        self.sender = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> LiveResult<()> {
        self.release();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.sender.is_some()
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

impl Drop for ScriptedCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Device factory handing out scripted capture and manual-clock playback
#[derive(Clone, Default)]
pub struct MockDevices {
    pub clock: ManualClock,
    pub probe: CaptureProbe,
    pub frames: Arc<Mutex<Vec<AudioFrame>>>,
    pub deny: Arc<AtomicBool>,
    pub start_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl MockDevices {
    pub fn with_frames(frames: Vec<AudioFrame>) -> Self {
        let devices = Self::default();
        *devices.frames.lock() = frames;
        devices
    }

    pub fn deny_microphone(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Captures created from now on block in `start` until the gate is notified
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn ungate_start(&self) {
        *self.start_gate.lock() = None;
    }
}

impl AudioDevices for MockDevices {
    fn capture(&self, _config: &CaptureConfig) -> LiveResult<Box<dyn AudioBackend>> {
        let mut capture = ScriptedCapture::new(
            self.frames.lock().clone(),
            self.deny.load(Ordering::SeqCst),
            self.probe.clone(),
        );
        capture.start_gate = self.start_gate.lock().clone();
        Ok(Box::new(capture))
    }

    fn playback(
        &self,
        config: &PlaybackConfig,
        completions: PlaybackCompletions,
    ) -> LiveResult<Box<dyn PlaybackDevice>> {
        *self.clock.completions.lock() = Some(completions);
        Ok(Box::new(self.clock.device(config.sample_rate)))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// How `MockTransport::open` behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Accept,
    Reject,
    /// Never completes
    Hang,
}

/// The service side of an in-memory channel
pub struct RemoteEnd {
    pub outbound: mpsc::Receiver<ClientMessage>,
    pub inbound: mpsc::Sender<ChannelEvent>,
}

impl RemoteEnd {
    pub async fn send(&self, json: &str) {
        self.inbound
            .send(ChannelEvent::Message(server_message(json)))
            .await
            .unwrap();
    }

    pub async fn close(&self, reason: &str) {
        self.inbound
            .send(ChannelEvent::Closed(reason.to_string()))
            .await
            .unwrap();
    }

    pub async fn fail(&self, reason: &str) {
        self.inbound
            .send(ChannelEvent::Failed(reason.to_string()))
            .await
            .unwrap();
    }

    /// Next message that is not microphone audio
    pub async fn next_non_audio(&mut self) -> ClientMessage {
        loop {
            let message = tokio::time::timeout(WAIT, self.outbound.recv())
                .await
                .expect("timed out waiting for outbound message")
                .expect("channel closed");
            match &message {
                ClientMessage::RealtimeInput(input)
                    if input
                        .media_chunks
                        .iter()
                        .all(|blob| blob.mime_type.starts_with("audio/pcm")) => {}
                _ => return message,
            }
        }
    }
}

pub struct MockTransport {
    mode: Mutex<OpenMode>,
    pub setups: Mutex<Vec<Setup>>,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

impl MockTransport {
    pub fn new(mode: OpenMode) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            mode: Mutex::new(mode),
            setups: Mutex::new(Vec::new()),
            remotes,
        });
        (transport, rx)
    }

    pub fn set_mode(&self, mode: OpenMode) {
        *self.mode.lock() = mode;
    }

    pub fn open_count(&self) -> usize {
        self.setups.lock().len()
    }
}

#[async_trait::async_trait]
impl LiveTransport for MockTransport {
    async fn open(&self, setup: Setup) -> LiveResult<LiveChannel> {
        self.setups.lock().push(setup);
        let mode = *self.mode.lock();
        match mode {
            OpenMode::Accept => {
                let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
                let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
                let _ = self.remotes.send(RemoteEnd {
                    outbound: out_rx,
                    inbound: in_tx,
                });
                Ok(LiveChannel::new(out_tx, in_rx))
            }
            OpenMode::Reject => Err(LiveError::ChannelRejected("setup refused".to_string())),
            OpenMode::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

// ============================================================================
// Session helpers
// ============================================================================

pub struct Harness {
    pub session: Arc<LiveSession>,
    pub transport: Arc<MockTransport>,
    pub remotes: mpsc::UnboundedReceiver<RemoteEnd>,
    pub devices: MockDevices,
}

impl Harness {
    pub fn new(mode: OpenMode, devices: MockDevices) -> Self {
        let (transport, remotes) = MockTransport::new(mode);
        let session = LiveSession::new(
            Default::default(),
            transport.clone(),
            Arc::new(devices.clone()),
        );
        Self {
            session: Arc::new(session),
            transport,
            remotes,
            devices,
        }
    }

    pub async fn remote(&mut self) -> RemoteEnd {
        tokio::time::timeout(WAIT, self.remotes.recv())
            .await
            .expect("timed out waiting for channel")
            .expect("transport dropped")
    }

    /// Wait until the published snapshot satisfies `f`
    pub async fn wait_for(&self, f: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        wait_snapshot(self.session.subscribe(), f).await
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        self.wait_for(|s| s.connection_state == state).await;
    }
}

pub async fn wait_snapshot(
    mut rx: watch::Receiver<SessionSnapshot>,
    f: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(WAIT, rx.wait_for(f))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session dropped")
        .clone()
}

/// Poll `f` until it holds or the wait times out
pub async fn eventually(mut f: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
