//! HTTP control API for hosting surfaces
//!
//! Lets a dashboard page drive chat sessions without holding the agent socket
//! itself:
//! - POST /sessions - Open a session for a patient
//! - POST /sessions/:id/messages - Send a typed message
//! - POST /sessions/:id/vitals - Report a vitals measurement
//! - POST /sessions/:id/mute - Toggle speech playback
//! - POST /sessions/:id/end - End the session and get its summary
//! - DELETE /sessions/:id - Close the session without a summary
//! - GET /sessions/:id/messages - Conversation so far
//! - GET /sessions/:id/status - Session status
//! - GET /health - Health check
//!
//! Sessions whose agent connection has closed are evicted when the next
//! session starts.

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, SessionTemplate};
