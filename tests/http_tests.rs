// Tests for the HTTP control API
//
// Requests go straight into the router; sessions connect to an in-process
// agent.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use pulsera_companion::protocol::ClientFrame;
use pulsera_companion::session::SessionConfig;
use pulsera_companion::transport::{MemoryListener, MemoryTransport, PeerMode, ServerEnd};
use pulsera_companion::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use tower::ServiceExt;

fn test_app() -> (Router, MemoryListener) {
    let (transport, listener) = MemoryTransport::new();
    let state = AppState::new(Arc::new(transport), |patient_id, endpoint| {
        SessionConfig::new(patient_id, endpoint)
            .with_connect_timeout(Duration::from_millis(500))
            .with_summary_timeout(Duration::from_millis(300))
    });
    (create_router(state), listener)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value)?),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, value))
}

async fn next_frame(server: &mut ServerEnd) -> ClientFrame {
    timeout(Duration::from_secs(2), server.recv_frame())
        .await
        .expect("client frame in time")
        .expect("connection open")
        .expect("valid client frame")
}

/// Start a session and wait until its connection is open
async fn start_session(app: &Router, listener: &mut MemoryListener) -> Result<(String, ServerEnd)> {
    let start = json!({"patient_id": "maria_001"});
    let (status, body) = call(app, "POST", "/sessions", Some(start)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "connecting");

    let session_id = body["session_id"].as_str().expect("session id").to_string();
    let mut server = timeout(Duration::from_secs(2), listener.accept())
        .await?
        .expect("transport alive");
    assert_eq!(next_frame(&mut server).await, ClientFrame::GetGreeting);

    for _ in 0..40 {
        let uri = format!("/sessions/{}/status", session_id);
        let (_, status) = call(app, "GET", &uri, None).await?;
        if status["connection"] == "open" {
            return Ok((session_id, server));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("session {} never opened", session_id);
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let (app, _listener) = test_app();

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"OK");
    Ok(())
}

#[tokio::test]
async fn test_start_session_connects_to_chat_endpoint() -> Result<()> {
    let (app, mut listener) = test_app();
    let (session_id, server) = start_session(&app, &mut listener).await?;

    assert!(session_id.starts_with("chat-"));
    assert_eq!(server.url, "ws://localhost:8000/ws/chat/maria_001");

    let uri = format!("/sessions/{}/status", session_id);
    let (status, body) = call(&app, "GET", &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["patient_id"], "maria_001");
    assert_eq!(body["endpoint"], "chat");
    assert_eq!(body["muted"], false);
    Ok(())
}

#[tokio::test]
async fn test_send_message_and_read_conversation() -> Result<()> {
    let (app, mut listener) = test_app();
    let (session_id, mut server) = start_session(&app, &mut listener).await?;
    let uri = format!("/sessions/{}/messages", session_id);

    let (status, body) = call(&app, "POST", &uri, Some(json!({"content": "I feel dizzy"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(
        next_frame(&mut server).await,
        ClientFrame::Text {
            content: "I feel dizzy".to_string()
        }
    );

    let (_, body) = call(&app, "POST", &uri, Some(json!({"content": "  "}))).await?;
    assert_eq!(body["accepted"], false);

    let (status, messages) = call(&app, "GET", &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    let messages = messages.as_array().expect("message list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "I feel dizzy");
    Ok(())
}

#[tokio::test]
async fn test_vitals_and_mute() -> Result<()> {
    let (app, mut listener) = test_app();
    let (session_id, mut server) = start_session(&app, &mut listener).await?;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sessions/{}/vitals", session_id),
        Some(json!({"heart_rate": 95.0, "hrv": 22.0})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(
        next_frame(&mut server).await,
        ClientFrame::VitalResult {
            heart_rate: 95.0,
            hrv: 22.0,
            is_normal: false
        }
    );

    let mute_uri = format!("/sessions/{}/mute", session_id);
    let (_, body) = call(&app, "POST", &mute_uri, None).await?;
    assert_eq!(body["muted"], true);
    let (_, body) = call(&app, "POST", &mute_uri, None).await?;
    assert_eq!(body["muted"], false);
    Ok(())
}

#[tokio::test]
async fn test_end_session_returns_summary_and_removes_session() -> Result<()> {
    let (app, mut listener) = test_app();
    let (session_id, mut server) = start_session(&app, &mut listener).await?;

    let agent = tokio::spawn(async move {
        assert_eq!(next_frame(&mut server).await, ClientFrame::EndSession);
        server
            .send_json(&json!({
                "type": "session_summary",
                "summary": {"subjective_summary": "No new symptoms"}
            }))
            .await
            .expect("send summary");
        server
    });

    let uri = format!("/sessions/{}/end", session_id);
    let (status, summary) = call(&app, "POST", &uri, None).await?;
    let mut server = agent.await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["session_id"], session_id.as_str());
    assert_eq!(summary["source"], "server");
    assert_eq!(summary["subjective_summary"], "No new symptoms");

    // Session is closed and forgotten
    let closed = timeout(Duration::from_secs(2), server.recv_raw()).await?;
    assert!(closed.is_none());
    let (status, _) = call(&app, "GET", &format!("/sessions/{}/status", session_id), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_unknown_session() -> Result<()> {
    let (app, _listener) = test_app();

    for (method, uri, body) in [
        ("GET", "/sessions/missing/status", None),
        ("GET", "/sessions/missing/messages", None),
        ("POST", "/sessions/missing/messages", Some(json!({"content": "hi"}))),
        ("POST", "/sessions/missing/vitals", Some(json!({"heart_rate": 70.0, "hrv": 40.0}))),
        ("POST", "/sessions/missing/mute", None),
        ("POST", "/sessions/missing/end", None),
    ] {
        let (status, body) = call(&app, method, uri, body).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body["error"], "Session missing not found");
    }
    Ok(())
}

#[tokio::test]
async fn test_triage_session_with_playback_dir() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let playback_dir = temp_dir.path().join("playback");

    let (transport, mut listener) = MemoryTransport::new();
    let state = AppState::new(Arc::new(transport), |patient_id, endpoint| {
        SessionConfig::new(patient_id, endpoint)
    })
    .with_playback_dir(&playback_dir);
    let app = create_router(state);

    let (status, body) = call(
        &app,
        "POST",
        "/sessions",
        Some(json!({
            "patient_id": "maria_001",
            "endpoint": "triage",
            "triage": {
                "vitals": {"heart_rate": 72.0, "hrv": 40.0},
                "conversation_history": [
                    {"role": "user", "content": "Slept well", "timestamp": "2025-10-27T14:30:00Z"}
                ]
            }
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["session_id"].is_string());
    assert!(playback_dir.is_dir(), "Playback directory is prepared per session");

    let mut server = timeout(Duration::from_secs(2), listener.accept())
        .await?
        .expect("transport alive");
    assert_eq!(server.url, "ws://localhost:8000/ws/triage");
    assert!(matches!(
        next_frame(&mut server).await,
        ClientFrame::Init { is_normal: true, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_delete_closes_and_forgets_session() -> Result<()> {
    let (app, mut listener) = test_app();
    let (session_id, mut server) = start_session(&app, &mut listener).await?;
    let uri = format!("/sessions/{}", session_id);

    let (status, _) = call(&app, "DELETE", &uri, None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let closed = timeout(Duration::from_secs(2), server.recv_raw()).await?;
    assert!(closed.is_none(), "Socket should be closed");
    let (status, _) = call(&app, "GET", &format!("{}/status", uri), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, "DELETE", &uri, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], format!("Session {} not found", session_id));
    Ok(())
}

#[tokio::test]
async fn test_closed_sessions_are_evicted_on_next_start() -> Result<()> {
    let (transport, mut listener) = MemoryTransport::new();
    transport.set_mode(PeerMode::Refuse).await;
    let state = AppState::new(Arc::new(transport.clone()), |patient_id, endpoint| {
        SessionConfig::new(patient_id, endpoint)
    });
    let app = create_router(state);

    let start = json!({"patient_id": "maria_001"});
    let (status, body) = call(&app, "POST", "/sessions", Some(start)).await?;
    assert_eq!(status, StatusCode::CREATED);
    let refused_id = body["session_id"].as_str().expect("session id").to_string();
    let refused_status = format!("/sessions/{}/status", refused_id);

    let mut closed = false;
    for _ in 0..40 {
        let (_, status) = call(&app, "GET", &refused_status, None).await?;
        if status["connection"] == "closed" {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(closed, "refused session should report a closed connection");

    transport.set_mode(PeerMode::Accept).await;
    let (live_id, _server) = start_session(&app, &mut listener).await?;

    let (status, _) = call(&app, "GET", &refused_status, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", &format!("/sessions/{}/status", live_id), None).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}
