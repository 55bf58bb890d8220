use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bytes escaped in a URL path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Agent endpoint a chat session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    /// Daily check-in companion (`/ws/chat/{patient_id}`)
    Chat,
    /// Questions about recorded health data (`/ws/health-chat/{patient_id}`)
    HealthChat,
    /// Post-check-in triage continuation (`/ws/triage`)
    Triage,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat",
            EndpointKind::HealthChat => "health-chat",
            EndpointKind::Triage => "triage",
        }
    }

    /// Build the socket URL for this endpoint
    ///
    /// The triage endpoint carries no patient path parameter; its context is
    /// delivered in the `init` frame instead. The patient id is escaped as one
    /// path segment.
    pub fn url(&self, ws_base_url: &str, patient_id: &str) -> String {
        let base = ws_base_url.trim_end_matches('/');
        match self {
            EndpointKind::Triage => format!("{}/ws/triage", base),
            _ => format!(
                "{}/ws/{}/{}",
                base,
                self.as_str(),
                utf8_percent_encode(patient_id, PATH_SEGMENT)
            ),
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(EndpointKind::Chat),
            "health-chat" | "health_chat" => Ok(EndpointKind::HealthChat),
            "triage" => Ok(EndpointKind::Triage),
            other => Err(format!(
                "unknown endpoint '{}' (expected chat, health-chat or triage)",
                other
            )),
        }
    }
}
