use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{ChatMessage, Role};
use super::state::ConnectionState;
use crate::protocol::{EndpointKind, ServerSummary};

/// Where a session summary came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// The agent answered `end_session` in time
    Server,
    /// Built locally after a timeout or without a connection
    Local,
}

/// Recap of a finished conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,

    pub patient_id: String,

    pub endpoint: EndpointKind,

    /// The local message list at the time the session ended
    pub messages: Vec<ChatMessage>,

    /// Number of user turns
    pub message_count: usize,

    /// Symptoms and context the agent picked up, if it reported any
    pub subjective_summary: Option<String>,

    /// The agent's summary as received
    pub server_summary: Option<ServerSummary>,

    pub source: SummarySource,

    pub ended_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn build(
        session_id: &str,
        patient_id: &str,
        endpoint: EndpointKind,
        messages: Vec<ChatMessage>,
        server_summary: Option<ServerSummary>,
    ) -> Self {
        let message_count = messages.iter().filter(|m| m.role == Role::User).count();
        let subjective_summary = server_summary
            .as_ref()
            .and_then(|s| s.subjective_summary.clone());
        let source = if server_summary.is_some() {
            SummarySource::Server
        } else {
            SummarySource::Local
        };

        Self {
            session_id: session_id.to_string(),
            patient_id: patient_id.to_string(),
            endpoint,
            messages,
            message_count,
            subjective_summary,
            server_summary,
            source,
            ended_at: Utc::now(),
        }
    }
}

/// Point-in-time view of a session for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub patient_id: String,
    pub endpoint: EndpointKind,
    pub connection: ConnectionState,
    pub muted: bool,
    pub processing: bool,
    pub recording: bool,
    pub playing: bool,
    pub message_count: usize,
}

impl SessionStatus {
    pub fn is_idle(&self) -> bool {
        !self.processing && !self.recording && !self.playing
    }
}
