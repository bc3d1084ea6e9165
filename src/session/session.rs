use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::scheduler::PlaybackScheduler;
use super::snapshot::SessionSnapshot;
use super::state::ConnectionState;
use super::turns::{ChatTurn, TurnAssembler};
use crate::audio::{
    encode_frame, volume_level, AudioBackend, AudioDevices, AudioFrame, PlaybackDevice, PlaybackId,
};
use crate::error::{LiveError, LiveResult};
use crate::live::{
    Blob, ChannelEvent, ClientMessage, LiveChannel, LiveEvent, LiveTransport, SendOutcome,
    ServerMessage,
};

/// Capacity of the finalized-turn broadcast
const TURN_BROADCAST_CAPACITY: usize = 64;

/// Work handed to the running session's event loop
#[derive(Debug)]
enum Command {
    Text { text: String, visible: bool },
    Media(Blob),
}

/// Connection bookkeeping guarded by one lock
///
/// `generation` is bumped by every connect and disconnect. Anything that finishes
/// asynchronously (a connect attempt, the event loop) only touches the state if
/// the generation it started with is still current.
#[derive(Default)]
struct Control {
    state: ConnectionState,
    generation: u64,
    cancel: Option<CancellationToken>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    actor: Option<JoinHandle<()>>,
}

struct Shared {
    transport: Arc<dyn LiveTransport>,
    devices: Arc<dyn AudioDevices>,
    config: Mutex<SessionConfig>,
    control: Mutex<Control>,
    snapshot: watch::Sender<SessionSnapshot>,
    turns: broadcast::Sender<ChatTurn>,
    /// Held by whichever connect attempt or event loop owns the devices
    devices_lease: Arc<AsyncMutex<()>>,
}

impl Shared {
    fn set_state(&self, control: &mut Control, state: ConnectionState) {
        if control.state != state {
            info!("Session state: {} -> {}", control.state, state);
        }
        control.state = state;
        self.snapshot.send_modify(|snapshot| {
            snapshot.connection_state = state;
            if !state.holds_resources() {
                snapshot.in_progress_input.clear();
                snapshot.in_progress_output.clear();
                snapshot.volume = 0.0;
            }
        });
    }

    /// Update the live parts of the snapshot (volume, in-progress text)
    ///
    /// Dropped once `generation` is no longer the current connection, so a
    /// late write from the event loop cannot outlive a disconnect.
    fn update_live(&self, generation: u64, update: impl FnOnce(&mut SessionSnapshot) -> bool) {
        let control = self.control.lock();
        if control.generation != generation || control.state != ConnectionState::Connected {
            return;
        }
        self.snapshot.send_if_modified(update);
    }

    /// Record a connect failure, unless a newer connect/disconnect took over
    fn fail(&self, generation: u64, err: &LiveError) {
        let mut control = self.control.lock();
        if control.generation != generation {
            return;
        }
        error!("Session failed to connect: {}", err);
        control.cancel = None;
        control.commands = None;
        self.set_state(&mut control, ConnectionState::Error);
    }

    fn publish_turns(&self, turns: Vec<ChatTurn>) {
        if turns.is_empty() {
            return;
        }
        self.snapshot
            .send_modify(|snapshot| snapshot.turns.extend(turns.iter().cloned()));
        for turn in turns {
            // No subscribers is fine
            let _ = self.turns.send(turn);
        }
    }

    /// Acquire both devices and open the channel, releasing whatever was
    /// acquired if a later step fails
    async fn establish(&self, config: &SessionConfig) -> LiveResult<Established> {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let mut playback = self
            .devices
            .playback(&config.playback_config(), completions_tx)?;

        let mut capture = match self.devices.capture(&config.capture_config()) {
            Ok(capture) => capture,
            Err(e) => {
                playback.close();
                return Err(e);
            }
        };

        if let Err(e) = capture.acquire().await {
            playback.close();
            return Err(e);
        }
        info!("Capture device ready: {}", capture.name());

        let channel = match self.transport.open(config.setup()).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(stop_err) = capture.stop().await {
                    warn!("Failed to release capture device: {}", stop_err);
                }
                playback.close();
                return Err(e);
            }
        };
        info!("Live channel open via {}", self.transport.name());

        Ok(Established {
            capture,
            playback,
            completions,
            channel,
        })
    }
}

/// Everything a connected session owns
struct Established {
    capture: Box<dyn AudioBackend>,
    playback: Box<dyn PlaybackDevice>,
    completions: mpsc::UnboundedReceiver<PlaybackId>,
    channel: LiveChannel,
}

impl Established {
    async fn release(mut self) {
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to release capture device: {}", e);
        }
        self.playback.close();
        self.channel.close();
    }
}

/// A live duplex audio session with the tutoring service
///
/// Owns at most one connection at a time. All mutation of connection state,
/// playback and transcripts is serialized on a single event loop per connection;
/// the methods here only hand work to it.
pub struct LiveSession {
    shared: Arc<Shared>,
}

impl LiveSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn LiveTransport>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (turns, _) = broadcast::channel(TURN_BROADCAST_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                transport,
                devices,
                config: Mutex::new(config),
                control: Mutex::new(Control::default()),
                snapshot,
                turns,
                devices_lease: Arc::new(AsyncMutex::new(())),
            }),
        }
    }

    /// Open the channel and start streaming microphone audio
    ///
    /// Valid from `disconnected` or `error`. Devices of any earlier connection are
    /// fully released before new ones are acquired. A `disconnect` while this is
    /// pending wins: the attempt is abandoned and anything acquired is released.
    pub async fn connect(&self) -> LiveResult<()> {
        let (generation, cancel, prior) = {
            let mut control = self.shared.control.lock();
            if !control.state.can_connect() {
                return Err(LiveError::InvalidTransition {
                    action: "connect",
                    from: control.state,
                });
            }
            control.generation += 1;
            let cancel = CancellationToken::new();
            control.cancel = Some(cancel.clone());
            control.commands = None;
            let prior = control.actor.take();
            self.shared.set_state(&mut control, ConnectionState::Connecting);
            (control.generation, cancel, prior)
        };

        if let Some(prior) = prior {
            if let Err(e) = prior.await {
                warn!("Previous session loop ended abnormally: {}", e);
            }
        }

        // Also covers an abandoned attempt that is still releasing its devices
        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Connect #{} abandoned", generation);
                return Err(LiveError::Cancelled);
            }
            lease = Arc::clone(&self.shared.devices_lease).lock_owned() => lease,
        };

        let config = self.shared.config.lock().clone();
        info!("Connecting session #{} (model {})", generation, config.qualified_model());

        let established = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Connect #{} abandoned", generation);
                return Err(LiveError::Cancelled);
            }
            result = self.shared.establish(&config) => result,
        };

        let mut parts = match established {
            Ok(parts) => parts,
            Err(e) => {
                self.shared.fail(generation, &e);
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            parts.release().await;
            return Err(LiveError::Cancelled);
        }

        let frames = match parts.capture.start().await {
            Ok(frames) => frames,
            Err(e) => {
                parts.release().await;
                self.shared.fail(generation, &e);
                return Err(e);
            }
        };

        let stale = {
            let mut control = self.shared.control.lock();
            if control.generation != generation {
                Some(parts)
            } else {
                let (commands_tx, commands) = mpsc::unbounded_channel();
                let actor = SessionActor {
                    shared: Arc::clone(&self.shared),
                    generation,
                    cancel,
                    channel: parts.channel,
                    capture: parts.capture,
                    frames: Some(frames),
                    scheduler: PlaybackScheduler::new(parts.playback),
                    completions: parts.completions,
                    commands,
                    turns: TurnAssembler::new(),
                    _lease: lease,
                };
                control.commands = Some(commands_tx);
                control.actor = Some(tokio::spawn(actor.run()));
                self.shared.set_state(&mut control, ConnectionState::Connected);
                None
            }
        };

        match stale {
            Some(parts) => {
                parts.release().await;
                Err(LiveError::Cancelled)
            }
            None => Ok(()),
        }
    }

    /// Stop everything and return to `disconnected`
    ///
    /// Idempotent and never waits: the state is `disconnected` when this returns,
    /// device and channel teardown finishes on the event loop.
    pub fn disconnect(&self) {
        let mut control = self.shared.control.lock();
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        control.commands = None;
        if control.state == ConnectionState::Disconnected {
            return;
        }
        control.generation += 1;
        self.shared.set_state(&mut control, ConnectionState::Disconnected);
    }

    /// Send typed text as a user turn and show it in the transcript
    ///
    /// Ignored unless connected.
    pub fn send_text_message(&self, text: &str) -> SendOutcome {
        self.dispatch(Command::Text {
            text: text.to_string(),
            visible: true,
        })
    }

    /// Send a steering instruction that never appears in the transcript
    pub fn send_hidden_message(&self, text: &str) -> SendOutcome {
        self.dispatch(Command::Text {
            text: text.to_string(),
            visible: false,
        })
    }

    /// Send a base64 media blob (e.g. an image) on the realtime input path
    pub fn send_realtime_input(&self, data: &str, mime_type: &str) -> SendOutcome {
        self.dispatch(Command::Media(Blob {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        }))
    }

    fn dispatch(&self, command: Command) -> SendOutcome {
        let control = self.shared.control.lock();
        if control.state != ConnectionState::Connected {
            debug!("Not connected ({}); message dropped", control.state);
            return SendOutcome::Dropped;
        }
        match &control.commands {
            Some(tx) if tx.send(command).is_ok() => SendOutcome::Sent,
            _ => SendOutcome::Dropped,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.control.lock().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Observe state, transcripts and volume as they change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Finalized turns as they are produced
    pub fn subscribe_turns(&self) -> broadcast::Receiver<ChatTurn> {
        self.shared.turns.subscribe()
    }

    pub fn config(&self) -> SessionConfig {
        self.shared.config.lock().clone()
    }

    /// Takes effect on the next connect
    pub fn set_system_instruction(&self, instruction: impl Into<String>) {
        self.shared.config.lock().system_instruction = instruction.into();
    }

    /// Takes effect on the next connect
    pub fn set_voice(&self, voice: impl Into<String>) {
        self.shared.config.lock().voice = voice.into();
    }

    /// Wait for the current event loop (if any) to finish its teardown
    pub async fn shutdown(&self) {
        self.disconnect();
        let actor = self.shared.control.lock().actor.take();
        if let Some(actor) = actor {
            if let Err(e) = actor.await {
                warn!("Session loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Why the event loop stopped
enum Exit {
    Requested,
    PeerClosed(String),
    Failed(String),
}

/// Event loop of one connection
///
/// Owns the channel, the capture backend and the playback scheduler; nothing else
/// touches them while it runs.
struct SessionActor {
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    channel: LiveChannel,
    capture: Box<dyn AudioBackend>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    scheduler: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<PlaybackId>,
    commands: mpsc::UnboundedReceiver<Command>,
    turns: TurnAssembler,
    /// Released when the loop is dropped at the end of `teardown`
    _lease: OwnedMutexGuard<()>,
}

impl SessionActor {
    async fn run(mut self) {
        info!("Session #{} loop started", self.generation);

        let exit = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Exit::Requested,

                Some(id) = self.completions.recv() => {
                    self.scheduler.complete(id);
                }

                event = self.channel.recv() => match event {
                    Some(ChannelEvent::Message(message)) => self.handle_message(message),
                    Some(ChannelEvent::Closed(reason)) => break Exit::PeerClosed(reason),
                    Some(ChannelEvent::Failed(reason)) => break Exit::Failed(reason),
                    None => break Exit::PeerClosed("transport ended".to_string()),
                },

                Some(command) = self.commands.recv() => self.handle_command(command),

                frame = next_frame(&mut self.frames) => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => {
                        info!("Capture stream ended");
                        self.frames = None;
                    }
                },
            }
        };

        self.teardown(exit).await;
    }

    fn handle_frame(&mut self, frame: AudioFrame) {
        let volume = volume_level(&frame.samples);
        self.shared.update_live(self.generation, |snapshot| {
            let changed = snapshot.volume != volume;
            snapshot.volume = volume;
            changed
        });

        if self.channel.send(ClientMessage::media(encode_frame(&frame))) == SendOutcome::Dropped {
            debug!("Audio block at {}ms dropped", frame.timestamp_ms);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Text { text, visible } => {
                if visible {
                    let turn = self.turns.local_user_turn(&text, Utc::now());
                    self.shared.publish_turns(vec![turn]);
                }
                self.channel.send(ClientMessage::user_text(text));
            }
            Command::Media(blob) => {
                debug!("Sending {} media ({} bytes base64)", blob.mime_type, blob.data.len());
                self.channel.send(ClientMessage::media(blob));
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        if let Some(go_away) = &message.go_away {
            warn!(
                "Service will close the session soon (time left: {})",
                go_away.time_left.as_deref().unwrap_or("unknown")
            );
        }

        for event in message.into_events() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::OutputTranscription(text) => {
                self.turns.push_output(&text);
                self.publish_in_progress();
            }
            LiveEvent::InputTranscription(text) => {
                self.turns.push_input(&text);
                self.publish_in_progress();
            }
            LiveEvent::Grounding(citations) => {
                debug!("{} citations received", citations.len());
                self.turns.add_citations(citations);
            }
            LiveEvent::TurnComplete => {
                let finalized = self.turns.finalize(Utc::now());
                self.shared.publish_turns(finalized);
                self.publish_in_progress();
            }
            LiveEvent::Audio(data) => {
                if let Err(e) = self.scheduler.enqueue(&data) {
                    warn!("Skipping audio fragment: {}", e);
                }
            }
            LiveEvent::Interrupted => self.interrupt(),
        }
    }

    /// Barge-in: silence the assistant and drop its partial answer
    fn interrupt(&mut self) {
        let stopped = self.scheduler.interrupt();
        self.turns.interrupt();
        self.publish_in_progress();
        info!("Interrupted: {} fragments stopped", stopped);
    }

    fn publish_in_progress(&self) {
        let input = self.turns.input();
        let output = self.turns.output();
        self.shared.update_live(self.generation, |snapshot| {
            if snapshot.in_progress_input == input && snapshot.in_progress_output == output {
                return false;
            }
            snapshot.in_progress_input = input.to_string();
            snapshot.in_progress_output = output.to_string();
            true
        });
    }

    async fn teardown(mut self, exit: Exit) {
        let final_state = match &exit {
            Exit::Requested => {
                info!("Session #{} disconnect requested", self.generation);
                ConnectionState::Disconnected
            }
            Exit::PeerClosed(reason) => {
                info!("Session #{} closed by peer: {}", self.generation, reason);
                ConnectionState::Disconnected
            }
            Exit::Failed(reason) => {
                error!("Session #{} failed: {}", self.generation, reason);
                ConnectionState::Error
            }
        };

        self.frames = None;
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to release capture device: {}", e);
        }
        self.scheduler.close();
        self.channel.close();
        self.turns.reset();

        let mut control = self.shared.control.lock();
        if control.generation == self.generation {
            control.cancel = None;
            control.commands = None;
            self.shared.set_state(&mut control, final_state);
        } else if !control.state.holds_resources() {
            self.shared.snapshot.send_if_modified(|snapshot| {
                let stale = snapshot.volume != 0.0
                    || !snapshot.in_progress_input.is_empty()
                    || !snapshot.in_progress_output.is_empty();
                snapshot.volume = 0.0;
                snapshot.in_progress_input.clear();
                snapshot.in_progress_output.clear();
                stale
            });
        }
        info!("Session #{} loop stopped", self.generation);
    }
}

/// Next captured block; pending forever once capture has ended
async fn next_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
