use anyhow::Result;
use tokio::sync::mpsc;

/// Something that happened on an open connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame from the agent
    Frame(String),
    /// Transport-level failure; the detail is for logs only
    Error(String),
    /// The connection is gone
    Closed,
}

/// An established connection to an agent endpoint
///
/// Outbound frames are pushed through `outbound`. Dropping the sender is how
/// the connection is closed: the transport sends its close handshake once the
/// channel drains.
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<TransportEvent>) -> Self {
        Self { outbound, inbound }
    }

    pub fn split(self) -> (mpsc::Sender<String>, mpsc::Receiver<TransportEvent>) {
        (self.outbound, self.inbound)
    }
}

/// Connection factory for agent endpoints
///
/// Implementations:
/// - WebSocket: the production agent backend
/// - Memory: an in-process peer (tests, demos)
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`
    ///
    /// Resolves once the connection is usable for sending.
    async fn connect(&self, url: &str) -> Result<Connection>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
