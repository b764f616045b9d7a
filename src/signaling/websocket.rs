//! WebSocket signaling client
//!
//! Connects to the relay, splits the stream, and runs one sender task and
//! one receiver task. Inbound frames are parsed into [`SignalEvent`]s and
//! forwarded through a channel to the coordinator; malformed frames are
//! dropped with a diagnostic (one bad payload must never take the loop
//! down).

use super::{ClientMessage, SignalEvent, SignalingClient};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Capacity of the inbound event channel handed to the coordinator
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// WebSocket implementation of the relay interface
pub struct WsSignalingClient {
    url: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl WsSignalingClient {
    /// Connect to the signaling relay
    ///
    /// Returns the client (outbound half) and the receiver of inbound
    /// [`SignalEvent`]s to hand to the coordinator.
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket relay URL (ws:// or wss://)
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<SignalEvent>)> {
        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Signaling(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling relay");

        let (write, read) = ws_stream.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(Self::sender_task(write, out_rx));
        tokio::spawn(Self::receiver_task(read, event_tx));

        Ok((
            Self {
                url: url.to_string(),
                tx: out_tx,
            },
            event_rx,
        ))
    }

    /// The relay URL this client connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sender task: forwards queued messages to the WebSocket
    async fn sender_task(
        mut write: futures_util::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send signaling message: {}", e);
                break;
            }
        }

        debug!("Signaling sender task terminated");
    }

    /// Receiver task: parses inbound frames and forwards events
    async fn receiver_task(
        mut read: futures_util::stream::SplitStream<WsStream>,
        event_tx: mpsc::Sender<SignalEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<SignalEvent>(&text) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            debug!("Signal event receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Dropping malformed signaling payload: {}", e);
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Signaling connection closed by relay");
                    break;
                }
                Err(e) => {
                    error!("Signaling connection error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Signaling receiver task terminated");
    }
}

#[async_trait]
impl SignalingClient for WsSignalingClient {
    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)
            .map_err(|e| Error::Signaling(format!("Failed to encode message: {}", e)))?;

        debug!("Sending signaling message: {}", json);

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::Signaling(format!("Failed to queue message: {}", e)))?;

        Ok(())
    }
}
