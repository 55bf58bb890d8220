use crate::config::Config;
use crate::protocol::EndpointKind;
use crate::session::{ChatSession, ConnectionState, SessionConfig};
use crate::transport::{Transport, WebSocketTransport};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Builds the configuration for a new session from patient and endpoint
pub type SessionTemplate = Arc<dyn Fn(&str, EndpointKind) -> SessionConfig + Send + Sync>;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active chat sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, Arc<ChatSession>>>>,

    /// Transport every session connects through
    pub transport: Arc<dyn Transport>,

    pub template: SessionTemplate,

    /// Where assistant speech is written; discarded when unset
    pub playback_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new<F>(transport: Arc<dyn Transport>, template: F) -> Self
    where
        F: Fn(&str, EndpointKind) -> SessionConfig + Send + Sync + 'static,
    {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            transport,
            template: Arc::new(template),
            playback_dir: None,
        }
    }

    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let playback_dir = config.audio.playback_path()?;
        let template_config = Arc::clone(&config);

        Ok(Self::new(Arc::new(WebSocketTransport::new()), move |patient_id, endpoint| {
            template_config.session_config(patient_id, endpoint)
        })
        .with_playback_dir(playback_dir))
    }

    pub fn with_playback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.playback_dir = Some(dir.into());
        self
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Close and forget sessions whose agent connection has ended
    ///
    /// Returns the number of sessions removed.
    pub async fn prune_closed(&self) -> usize {
        let mut sessions = self.sessions.write().await;

        let mut closed = Vec::new();
        for (session_id, session) in sessions.iter() {
            if session.connection_state().await == ConnectionState::Closed {
                closed.push(session_id.clone());
            }
        }

        for session_id in &closed {
            if let Some(session) = sessions.remove(session_id) {
                session.close().await;
                info!("Evicted closed session {}", session_id);
            }
        }

        closed.len()
    }
}
