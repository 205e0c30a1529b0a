// WebSocket signaling client — JSON frames over a persistent socket
//
// Speaks a small rendezvous protocol: one `join` per room, targeted `signal`
// frames both ways, `peer-joined`/`peer-left` broadcasts from the server.

use super::{SignalMessage, SignalingClient, SignalingError, SignalingEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
enum ClientFrame {
    Join { room: String, peer_id: String },
    Signal { to: String, message: SignalMessage },
    Leave,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
enum ServerFrame {
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Signal { from: String, message: SignalMessage },
}

impl ServerFrame {
    fn into_event(self) -> SignalingEvent {
        match self {
            Self::PeerJoined { peer_id } => SignalingEvent::PeerJoined { peer_id },
            Self::PeerLeft { peer_id } => SignalingEvent::PeerLeft { peer_id },
            Self::Signal { from, message } => SignalingEvent::Signal { from, message },
        }
    }
}

/// Signaling over a WebSocket rendezvous service
pub struct WsSignalingClient {
    out_tx: mpsc::UnboundedSender<ClientFrame>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsSignalingClient {
    /// Connect and return the client plus its event subscription
    pub async fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SignalingEvent>), SignalingError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode signaling frame: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if event_tx.send(frame.into_event()).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("ignoring unparseable signaling frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            debug!("signaling socket closed");
        });

        let client = Arc::new(Self {
            out_tx,
            tasks: Mutex::new(vec![writer, reader]),
        });
        Ok((client, event_rx))
    }

    fn enqueue(&self, frame: ClientFrame) -> Result<(), SignalingError> {
        self.out_tx
            .send(frame)
            .map_err(|_| SignalingError::ConnectionFailed("signaling socket closed".to_string()))
    }
}

#[async_trait]
impl SignalingClient for WsSignalingClient {
    async fn join_room(&self, room_id: &str, local_peer_id: &str) -> Result<(), SignalingError> {
        self.enqueue(ClientFrame::Join {
            room: room_id.to_string(),
            peer_id: local_peer_id.to_string(),
        })
    }

    async fn send_to(&self, peer_id: &str, message: SignalMessage) -> Result<(), SignalingError> {
        self.enqueue(ClientFrame::Signal {
            to: peer_id.to_string(),
            message,
        })
    }

    async fn leave(&self) {
        let _ = self.enqueue(ClientFrame::Leave);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
