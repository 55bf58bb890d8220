pub mod audio;
pub mod config;
pub mod http;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioClip, AudioFile, AudioFrame,
    AudioPlayer, AudioSink, AudioSource, MicRecorder, PlaybackEvent, RecordedAudio,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use protocol::{ClientFrame, EndpointKind, ServerFrame, ServerSummary};
pub use session::{
    ChatMessage, ChatSession, ChatSessionBuilder, ConnectionState, SessionConfig, SessionEvent,
    SessionHandle, SessionStatus, SessionSummary, VitalsSnapshot,
};
pub use transport::{Connection, Transport, TransportEvent, WebSocketTransport};
