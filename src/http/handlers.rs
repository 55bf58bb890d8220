use super::state::AppState;
use crate::audio::{AudioSink, FileSink, NullSink, StaticPermission};
use crate::protocol::EndpointKind;
use crate::session::{
    ChatMessage, ChatSession, SessionStatus, SessionSummary, TriageContext, VitalsSnapshot,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub patient_id: String,

    /// Defaults to the daily check-in chat
    pub endpoint: Option<EndpointKind>,

    /// Check-in context, required for the triage endpoint
    pub triage: Option<TriageContext>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(session_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session {} not found", session_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Open a chat session for a patient
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Response {
    state.prune_closed().await;

    let endpoint = req.endpoint.unwrap_or(EndpointKind::Chat);

    let mut config = (state.template)(&req.patient_id, endpoint);
    if let Some(context) = req.triage {
        config = config.with_triage(context);
    }
    let session_id = config.session_id.clone();

    info!("Starting {} session for patient {}", endpoint, req.patient_id);

    let sink: Arc<dyn AudioSink> = match &state.playback_dir {
        Some(dir) => match FileSink::new(dir, session_id.clone()) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!("Failed to prepare playback directory: {:#}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: format!("Failed to prepare playback directory: {}", e),
                    }),
                )
                    .into_response();
            }
        },
        None => Arc::new(NullSink),
    };

    // Server-hosted sessions have no microphone; voice stays with the page
    let session = ChatSession::builder(config)
        .transport(Arc::clone(&state.transport))
        .sink(sink)
        .microphone(Arc::new(StaticPermission::denied()))
        .build();

    session.open().await;

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), Arc::new(session));
    }

    (
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            status: "connecting".to_string(),
            message: format!("Session {} opening", session_id),
        }),
    )
        .into_response()
}

/// POST /sessions/:session_id/messages
/// Send a typed message
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    let accepted = session.send_text(&req.content).await;
    (StatusCode::OK, Json(AcceptedResponse { accepted })).into_response()
}

/// GET /sessions/:session_id/messages
/// Conversation so far
pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.session(&session_id).await {
        Some(session) => {
            let messages: Vec<ChatMessage> = session.messages().await;
            (StatusCode::OK, Json(messages)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/vitals
/// Report a completed measurement
pub async fn submit_vitals(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(vitals): Json<VitalsSnapshot>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    let accepted = session.send_vitals(vitals).await;
    (StatusCode::OK, Json(AcceptedResponse { accepted })).into_response()
}

/// POST /sessions/:session_id/mute
/// Toggle speech playback
pub async fn toggle_mute(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    let muted = session.toggle_mute().await;
    (StatusCode::OK, Json(MuteResponse { muted })).into_response()
}

/// GET /sessions/:session_id/status
/// Get status of a chat session
pub async fn get_status(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.session(&session_id).await {
        Some(session) => {
            let status: SessionStatus = session.status().await;
            (StatusCode::OK, Json(status)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/end
/// End the conversation, close the session and return its summary
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    info!("Ending session: {}", session_id);

    // Find and remove session
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match session {
        Some(session) => {
            let summary: SessionSummary = session.end_session().await;
            session.close().await;

            info!(
                "Session {} ended ({} messages, {:?} summary)",
                session_id,
                summary.messages.len(),
                summary.source
            );
            (StatusCode::OK, Json(summary)).into_response()
        }
        None => {
            error!("Session {} not found", session_id);
            not_found(&session_id)
        }
    }
}

/// DELETE /sessions/:session_id
/// Close a session without asking for a summary
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let session = state.sessions.write().await.remove(&session_id);

    match session {
        Some(session) => {
            session.close().await;
            info!("Session {} closed", session_id);
            StatusCode::NO_CONTENT.into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
