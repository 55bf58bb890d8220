//! Connections to the agent backend
//!
//! The session owns exactly one [`Connection`] at a time. A connection is a pair
//! of channels so the session never shares the socket itself with anything:
//! - WebSocket: tokio-tungstenite client for the real backend
//! - Memory: in-process peer for tests and offline demos

pub mod backend;
pub mod memory;
pub mod websocket;

pub use backend::{Connection, Transport, TransportEvent};
pub use memory::{MemoryListener, MemoryTransport, PeerMode, ServerEnd};
pub use websocket::WebSocketTransport;
