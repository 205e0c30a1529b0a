// Signaling relay seam — rendezvous for connection setup
//
// A room-scoped publish/subscribe channel to some rendezvous service, used
// only to exchange session descriptions and reachability candidates. Relayed
// payloads never travel through here.

pub mod memory;
pub mod ws;

use crate::transport::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Not joined to a room")]
    NotJoined,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A targeted connection-setup message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer { sdp: SessionDescription },
    Answer { sdp: SessionDescription },
    IceCandidate { candidate: IceCandidate },
}

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// What the relay delivers to a joined client
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// A new peer announced itself in the room
    PeerJoined { peer_id: String },
    /// A peer left the room (or its relay connection dropped)
    PeerLeft { peer_id: String },
    /// A message addressed to the local peer
    Signal { from: String, message: SignalMessage },
}

/// Client side of the rendezvous service. Constructors return the client
/// together with the `SignalingEvent` receiver for its subscription.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Announce local presence in a named room
    async fn join_room(&self, room_id: &str, local_peer_id: &str) -> Result<(), SignalingError>;
    /// Send a targeted message to one peer in the room
    async fn send_to(&self, peer_id: &str, message: SignalMessage) -> Result<(), SignalingError>;
    /// Leave the room and detach. Idempotent.
    async fn leave(&self);
}
