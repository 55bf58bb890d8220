use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::backend::{Connection, Transport, TransportEvent};

/// WebSocket transport for the agent backend
pub struct WebSocketTransport {
    buffer: usize,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self { buffer: 64 }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Connection> {
        info!("Connecting to agent endpoint at {}", url);

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .context("WebSocket handshake failed")?;

        info!("Connected to agent endpoint");

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(self.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.buffer * 4);

        // Writer: forward frames until the session drops its sender, then close
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send frame: {}", e);
                    break;
                }
            }

            debug!("Outbound channel closed, closing socket");
            if let Err(e) = write.close().await {
                debug!("Socket close handshake failed: {}", e);
            }
        });

        // Reader: surface text frames, report errors without tearing anything down
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            debug!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue, // ping/pong are answered by tungstenite
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };

                if inbound_tx.send(event).await.is_err() {
                    // Session is gone
                    return;
                }
            }

            let _ = inbound_tx.send(TransportEvent::Closed).await;
        });

        Ok(Connection::new(outbound_tx, inbound_rx))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
