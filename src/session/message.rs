use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn in the conversation
///
/// Messages are append-only: once a message is in the session's list it is
/// never edited or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    pub content: String,

    /// When the message was appended locally
    pub timestamp: DateTime<Utc>,

    /// User turn produced by server-side speech transcription
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_transcription: bool,

    /// Assistant turn answering a vitals measurement
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_vital_response: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_transcription: false,
            is_vital_response: false,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn transcription(content: impl Into<String>) -> Self {
        Self {
            is_transcription: true,
            ..Self::user(content)
        }
    }

    pub fn vital_response(content: impl Into<String>) -> Self {
        Self {
            is_vital_response: true,
            ..Self::assistant(content)
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::system(content)
        }
    }
}

/// A completed vitals measurement handed over by the hosting surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    /// Beats per minute
    pub heart_rate: f64,

    /// Heart rate variability in milliseconds
    pub hrv: f64,

    /// Signal quality reported by the camera pipeline (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl VitalsSnapshot {
    pub fn new(heart_rate: f64, hrv: f64) -> Self {
        Self {
            heart_rate,
            hrv,
            quality_score: None,
        }
    }
}
