use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::backend::{Connection, Transport, TransportEvent};
use crate::protocol::ClientFrame;

/// How the in-process peer answers connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    /// Hand every connection to the listener
    Accept,
    /// Fail immediately, like a refused TCP connect
    Refuse,
    /// Never answer, like a blackholed host
    Hang,
}

/// In-process transport whose far end is driven by a [`MemoryListener`]
#[derive(Clone)]
pub struct MemoryTransport {
    mode: Arc<Mutex<PeerMode>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryListener) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let transport = Self {
            mode: Arc::new(Mutex::new(PeerMode::Accept)),
            accepted,
        };
        (transport, MemoryListener { incoming })
    }

    pub async fn set_mode(&self, mode: PeerMode) {
        *self.mode.lock().await = mode;
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let mode = *self.mode.lock().await;
        match mode {
            PeerMode::Accept => {}
            PeerMode::Refuse => bail!("Connection refused by in-process peer"),
            PeerMode::Hang => {
                debug!("In-process peer ignoring connection to {}", url);
                std::future::pending::<()>().await;
            }
        }

        let (client_tx, client_rx) = mpsc::channel(64);
        let (server_tx, server_rx) = mpsc::channel(256);

        self.accepted
            .send(ServerEnd {
                url: url.to_string(),
                incoming: client_rx,
                outgoing: server_tx,
            })
            .context("In-process listener is gone")?;

        Ok(Connection::new(client_tx, server_rx))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Accepts connections made through a [`MemoryTransport`]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.incoming.recv().await
    }
}

/// The agent side of an in-process connection
pub struct ServerEnd {
    pub url: String,
    incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<TransportEvent>,
}

impl ServerEnd {
    /// Push a raw text frame to the client
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.outgoing
            .send(TransportEvent::Frame(text.into()))
            .await
            .context("Client side of the connection is gone")
    }

    /// Push a JSON frame to the client
    pub async fn send_json<T: Serialize>(&self, frame: &T) -> Result<()> {
        let text = serde_json::to_string(frame).context("Failed to encode server frame")?;
        self.send_raw(text).await
    }

    /// Report a transport error to the client
    pub async fn fail(&self, detail: impl Into<String>) -> Result<()> {
        self.outgoing
            .send(TransportEvent::Error(detail.into()))
            .await
            .context("Client side of the connection is gone")
    }

    /// Next raw frame from the client, `None` once the client closed
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next frame from the client, decoded
    pub async fn recv_frame(&mut self) -> Option<Result<ClientFrame>> {
        let raw = self.recv_raw().await?;
        Some(serde_json::from_str(&raw).context("Failed to decode client frame"))
    }

    /// Close from the agent side
    pub async fn close(self) {
        let _ = self.outgoing.send(TransportEvent::Closed).await;
    }
}
