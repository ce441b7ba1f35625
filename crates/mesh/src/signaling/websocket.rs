//! WebSocket signaling client

use super::protocol::{InboundSignal, OutboundSignal};
use super::SignalingChannel;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// WebSocket connection to the meeting signaling server
///
/// Outbound events are queued on an unbounded channel drained by a writer
/// task; inbound frames are decoded by a reader task and delivered in
/// arrival order on the receiver returned from [`connect`](Self::connect).
pub struct WebSocketSignaling {
    outbound: mpsc::UnboundedSender<OutboundSignal>,
    reader: JoinHandle<()>,
}

impl WebSocketSignaling {
    /// Connect to `url` and start the reader/writer tasks
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<InboundSignal>)> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect to {}: {}", url, e)))?;

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundSignal>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundSignal>();

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping outbound signaling event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_write.send(Message::Text(text)).await {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
            let _ = ws_write.close().await;
            debug!("Signaling writer stopped");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match InboundSignal::from_json(&text) {
                        Ok(signal) => {
                            if inbound_tx.send(signal).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Skipping signaling frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling reader stopped");
        });

        info!("Connected to signaling server");

        Ok((
            Self {
                outbound: outbound_tx,
                reader,
            },
            inbound_rx,
        ))
    }

    /// Whether the writer task is still accepting events
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

impl SignalingChannel for WebSocketSignaling {
    fn send(&self, message: OutboundSignal) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::SignalingError("signaling connection closed".to_string()))
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        // The writer drains whatever is still queued once `outbound` drops
        self.reader.abort();
    }
}
