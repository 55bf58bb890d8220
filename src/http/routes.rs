use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions", post(handlers::start_session))
        .route("/sessions/:session_id", delete(handlers::close_session))
        .route("/sessions/:session_id/end", post(handlers::end_session))
        // Conversation
        .route(
            "/sessions/:session_id/messages",
            get(handlers::get_messages).post(handlers::send_message),
        )
        .route("/sessions/:session_id/vitals", post(handlers::submit_vitals))
        .route("/sessions/:session_id/mute", post(handlers::toggle_mute))
        // Session queries
        .route("/sessions/:session_id/status", get(handlers::get_status))
        // Dashboard pages live on another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
