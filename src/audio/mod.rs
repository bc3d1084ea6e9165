pub mod backend;
pub mod encoding;
pub mod file;
pub mod output;

#[cfg(feature = "cpal-audio")]
pub mod cpal;

pub use backend::{
    AudioBackend, AudioBackendFactory, AudioDevices, AudioFrame, AudioOutput, AudioSource,
    CaptureConfig, SystemAudio,
};
pub use encoding::{decode_fragment, encode_frame, volume_level, AudioFragment};
pub use file::{AudioFile, FileBackend};
pub use output::{NullPlayback, PlaybackCompletions, PlaybackConfig, PlaybackDevice, PlaybackId};
