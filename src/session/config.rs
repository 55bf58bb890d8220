use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::message::{ChatMessage, VitalsSnapshot};
use crate::protocol::EndpointKind;

/// Rule deciding whether a vitals reading counts as normal
///
/// Hosting surfaces historically disagreed on this, so it stays a per-endpoint
/// setting rather than one global rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalsThreshold {
    /// Heart rate within 60-100 bpm
    Standard,
    /// Heart rate within 60-85 bpm and HRV of at least 35 ms
    Strict,
}

impl VitalsThreshold {
    pub fn is_normal(&self, vitals: &VitalsSnapshot) -> bool {
        match self {
            VitalsThreshold::Standard => (60.0..=100.0).contains(&vitals.heart_rate),
            VitalsThreshold::Strict => {
                (60.0..=85.0).contains(&vitals.heart_rate) && vitals.hrv >= 35.0
            }
        }
    }

    pub fn default_for(endpoint: EndpointKind) -> Self {
        match endpoint {
            EndpointKind::Chat => VitalsThreshold::Strict,
            EndpointKind::HealthChat => VitalsThreshold::Standard,
            EndpointKind::Triage => VitalsThreshold::Strict,
        }
    }
}

/// What the triage endpoint needs to pick up where the check-in left off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageContext {
    pub vitals: VitalsSnapshot,
    pub conversation_history: Vec<ChatMessage>,
}

/// Configuration for one chat session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: String,

    pub patient_id: String,

    pub endpoint: EndpointKind,

    /// Agent backend base URL (e.g. "ws://localhost:8000")
    pub ws_base_url: String,

    /// How long `open` waits before telling the user the backend is unreachable
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// How long `end_session` waits for the agent's summary
    /// Default: 3 seconds
    pub summary_timeout: Duration,

    pub threshold: VitalsThreshold,

    /// Whether the hosting surface renders its title bar
    pub show_header: bool,

    /// Required by the triage endpoint
    pub triage: Option<TriageContext>,
}

impl SessionConfig {
    pub fn new(patient_id: impl Into<String>, endpoint: EndpointKind) -> Self {
        Self {
            session_id: format!("chat-{}", uuid::Uuid::new_v4()),
            patient_id: patient_id.into(),
            endpoint,
            ws_base_url: "ws://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            summary_timeout: Duration::from_secs(3),
            threshold: VitalsThreshold::default_for(endpoint),
            show_header: true,
            triage: None,
        }
    }

    pub fn with_base_url(mut self, ws_base_url: impl Into<String>) -> Self {
        self.ws_base_url = ws_base_url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout = timeout;
        self
    }

    pub fn with_threshold(mut self, threshold: VitalsThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_header(mut self, show_header: bool) -> Self {
        self.show_header = show_header;
        self
    }

    pub fn with_triage(mut self, context: TriageContext) -> Self {
        self.triage = Some(context);
        self
    }

    pub fn url(&self) -> String {
        self.endpoint.url(&self.ws_base_url, &self.patient_id)
    }
}
