use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::{ChatMessage, VitalsSnapshot};

/// Frames sent from the companion to the agent endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Ask the agent to open the conversation
    GetGreeting,

    /// Typed user turn
    Text { content: String },

    /// Recorded user turn
    Audio {
        data: String, // Base64-encoded container bytes
        format: String,
    },

    /// Result of a completed vitals measurement
    VitalResult {
        heart_rate: f64,
        hrv: f64,
        is_normal: bool,
    },

    /// Request the session summary and let the agent wrap up
    EndSession,

    /// Triage bootstrap carrying the check-in that led here
    Init {
        vitals: VitalsSnapshot,
        conversation_history: Vec<ChatMessage>,
        is_normal: bool,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode client frame")
    }
}

/// Frames received from the agent endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Greeting {
        content: String,
    },

    /// Server-side speech-to-text of a recorded user turn
    Transcription {
        #[serde(alias = "text")]
        content: String,
    },

    Response {
        content: String,
    },

    VitalResponse {
        content: String,
    },

    /// One piece of a streamed assistant utterance
    AudioChunk {
        #[serde(default, alias = "audio")]
        data: String, // Base64-encoded bytes, empty on a bare terminal marker
        #[serde(default)]
        is_final: bool,
    },

    /// Speech synthesis failed; the text of the turn was already delivered
    TtsError {
        #[serde(default)]
        message: String,
    },

    Error {
        #[serde(default, alias = "content")]
        message: String,
    },

    SessionSummary {
        #[serde(default)]
        summary: ServerSummary,
    },

    /// Triage endpoint closing the conversation on its own
    SessionEnd {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        summary: Option<ServerSummary>,
    },

    /// Anything this client does not know about yet
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse server frame")
    }
}

/// Conversation recap computed by the agent at session end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    /// The agent's own view of the conversation (entries are agent-defined)
    #[serde(default)]
    pub conversation_history: Vec<serde_json::Value>,

    /// Symptom contexts the agent extracted, one entry per tagged turn
    #[serde(default)]
    pub subjective_data: Vec<serde_json::Value>,

    /// Short description of symptoms and context the patient mentioned
    #[serde(default)]
    pub subjective_summary: Option<String>,

    /// Number of user turns the agent counted
    #[serde(default)]
    pub message_count: Option<usize>,

    /// RFC3339 timestamp of the session end on the agent side
    #[serde(default)]
    pub session_end: Option<String>,
}
