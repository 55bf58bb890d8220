//! Streaming chat session management
//!
//! This module provides the `ChatSession` abstraction that manages:
//! - One agent connection per chat surface (connect, greeting, watchdog)
//! - Text, recorded audio and vitals going out
//! - Messages, processing state and streamed speech coming in
//! - Session teardown and summary retrieval

mod config;
mod message;
mod playback;
mod session;
pub mod state;
mod summary;

pub use config::{SessionConfig, TriageContext, VitalsThreshold};
pub use message::{ChatMessage, Role, VitalsSnapshot};
pub use playback::PlaybackBuffer;
pub use session::{CaptureFactory, ChatSession, ChatSessionBuilder, SessionHandle, SummaryCallback};
pub use state::{ConnectionState, Effect, SessionEvent, SessionState};
pub use summary::{SessionStatus, SessionSummary, SummarySource};
