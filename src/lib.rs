pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod tutor;

pub use audio::{
    AudioBackend, AudioBackendFactory, AudioDevices, AudioFile, AudioFrame, AudioOutput,
    AudioSource, CaptureConfig, FileBackend, NullPlayback, PlaybackConfig, PlaybackDevice,
    PlaybackId, SystemAudio,
};
pub use config::Config;
pub use error::{LiveError, LiveResult};
pub use http::{create_router, AppState};
pub use live::{GeminiTransport, LiveChannel, LiveTransport, SendOutcome};
pub use session::{
    ChatTurn, Citation, ConnectionState, LiveSession, PlaybackScheduler, Role, SessionConfig,
    SessionSnapshot, TurnAssembler,
};
pub use tutor::{Subject, TutorSession};
