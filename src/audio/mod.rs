pub mod backend;
pub mod file;
pub mod permission;
pub mod player;
pub mod recorder;
pub mod sinks;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use file::{AudioFile, FileBackend};
pub use permission::{MicrophoneAccess, StaticPermission};
pub use player::{AudioClip, AudioPlayer, AudioSink, PlaybackEvent};
pub use recorder::{encode_wav, MicRecorder, RecordedAudio};
pub use sinks::{decode_clip, DecodingSink, FileSink, NullSink};
