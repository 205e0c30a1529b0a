// In-process signaling hub — room-scoped rendezvous for tests and demos

use super::{SignalMessage, SignalingClient, SignalingError, SignalingEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct Member {
    peer_id: String,
    tx: mpsc::UnboundedSender<SignalingEvent>,
}

/// Shared rendezvous point. Clients created from one hub can signal each
/// other once they join the same room.
pub struct MemorySignalingHub {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
}

impl MemorySignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
        })
    }

    /// A fresh client plus its event subscription
    pub fn client(
        self: &Arc<Self>,
    ) -> (Arc<MemorySignaling>, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(MemorySignaling {
            hub: self.clone(),
            tx,
            joined: Mutex::new(None),
        });
        (client, rx)
    }

    fn join(&self, room_id: &str, peer_id: &str, tx: mpsc::UnboundedSender<SignalingEvent>) {
        let mut rooms = self.rooms.lock();
        let members = rooms.entry(room_id.to_string()).or_default();
        // announce the newcomer to everyone already present; existing
        // members become offerers, the newcomer answers
        for member in members.iter() {
            let _ = member.tx.send(SignalingEvent::PeerJoined {
                peer_id: peer_id.to_string(),
            });
        }
        members.push(Member {
            peer_id: peer_id.to_string(),
            tx,
        });
    }

    fn route(
        &self,
        room_id: &str,
        from: &str,
        to: &str,
        message: SignalMessage,
    ) -> Result<(), SignalingError> {
        let rooms = self.rooms.lock();
        let member = rooms
            .get(room_id)
            .and_then(|members| members.iter().find(|m| m.peer_id == to))
            .ok_or_else(|| SignalingError::SendFailed(format!("no such peer {to}")))?;
        member
            .tx
            .send(SignalingEvent::Signal {
                from: from.to_string(),
                message,
            })
            .map_err(|_| SignalingError::SendFailed(format!("peer {to} is gone")))
    }

    fn leave(&self, room_id: &str, peer_id: &str) {
        let mut rooms = self.rooms.lock();
        if let Some(members) = rooms.get_mut(room_id) {
            members.retain(|m| m.peer_id != peer_id);
            for member in members.iter() {
                let _ = member.tx.send(SignalingEvent::PeerLeft {
                    peer_id: peer_id.to_string(),
                });
            }
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }
}

/// One client's connection to the hub
pub struct MemorySignaling {
    hub: Arc<MemorySignalingHub>,
    tx: mpsc::UnboundedSender<SignalingEvent>,
    joined: Mutex<Option<(String, String)>>,
}

#[async_trait]
impl SignalingClient for MemorySignaling {
    async fn join_room(&self, room_id: &str, local_peer_id: &str) -> Result<(), SignalingError> {
        self.hub.join(room_id, local_peer_id, self.tx.clone());
        *self.joined.lock() = Some((room_id.to_string(), local_peer_id.to_string()));
        debug!("{local_peer_id} joined room {room_id}");
        Ok(())
    }

    async fn send_to(&self, peer_id: &str, message: SignalMessage) -> Result<(), SignalingError> {
        let (room_id, local_id) = self.joined.lock().clone().ok_or(SignalingError::NotJoined)?;
        self.hub.route(&room_id, &local_id, peer_id, message)
    }

    async fn leave(&self) {
        if let Some((room_id, local_id)) = self.joined.lock().take() {
            self.hub.leave(&room_id, &local_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SdpKind, SessionDescription};

    fn offer() -> SignalMessage {
        SignalMessage::Offer {
            sdp: SessionDescription {
                kind: SdpKind::Offer,
                sdp: "x".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_join_announces_to_existing_members_only() {
        let hub = MemorySignalingHub::new();
        let (a, mut a_rx) = hub.client();
        let (b, mut b_rx) = hub.client();

        a.join_room("r", "peer-a").await.unwrap();
        b.join_room("r", "peer-b").await.unwrap();

        // a hears about b
        match a_rx.recv().await.unwrap() {
            SignalingEvent::PeerJoined { peer_id } => assert_eq!(peer_id, "peer-b"),
            other => panic!("unexpected event {other:?}"),
        }
        // b hears nothing
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_routing() {
        let hub = MemorySignalingHub::new();
        let (a, _a_rx) = hub.client();
        let (b, mut b_rx) = hub.client();

        a.join_room("r", "peer-a").await.unwrap();
        b.join_room("r", "peer-b").await.unwrap();

        a.send_to("peer-b", offer()).await.unwrap();
        match b_rx.recv().await.unwrap() {
            SignalingEvent::Signal { from, message } => {
                assert_eq!(from, "peer-a");
                assert_eq!(message.kind(), "offer");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = MemorySignalingHub::new();
        let (a, _a_rx) = hub.client();
        let (b, mut b_rx) = hub.client();

        a.join_room("room-1", "peer-a").await.unwrap();
        b.join_room("room-2", "peer-b").await.unwrap();

        assert!(a.send_to("peer-b", offer()).await.is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_before_join_fails() {
        let hub = MemorySignalingHub::new();
        let (a, _a_rx) = hub.client();
        assert!(matches!(
            a.send_to("peer-b", offer()).await,
            Err(SignalingError::NotJoined)
        ));
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining() {
        let hub = MemorySignalingHub::new();
        let (a, mut a_rx) = hub.client();
        let (b, _b_rx) = hub.client();

        a.join_room("r", "peer-a").await.unwrap();
        b.join_room("r", "peer-b").await.unwrap();
        let _ = a_rx.recv().await; // peer-b joined

        b.leave().await;
        match a_rx.recv().await.unwrap() {
            SignalingEvent::PeerLeft { peer_id } => assert_eq!(peer_id, "peer-b"),
            other => panic!("unexpected event {other:?}"),
        }

        // leaving twice is fine
        b.leave().await;
    }
}
