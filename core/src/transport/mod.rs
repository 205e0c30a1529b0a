// Transport abstraction — peer links and data channels
//
// The engine never talks to a concrete network stack. A platform provides a
// `Transport` that mints `PeerLink`s; the link produces session descriptions
// and reachability candidates (exchanged out of band via the signaling
// relay) and, once established, carries string frames over `DataChannel`s.

pub mod manager;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel is not open")]
    ChannelClosed,
    #[error("Link failure: {0}")]
    Link(String),
    #[error("Unusable remote description: {0}")]
    BadDescription(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description produced by one end of a link and applied at the
/// other, carried through the signaling relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

/// A network reachability descriptor for NAT traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u32>,
}

/// Connection state reported by a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States from which a link never recovers
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Data channel parameters. Unordered with bounded retransmits by default:
/// the protocol tolerates reordering and bounded loss, and buys latency with
/// them.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub label: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: "mesh".to_string(),
            ordered: false,
            max_retransmits: Some(2),
        }
    }
}

pub type CandidateHandler = Box<dyn Fn(IceCandidate) + Send + Sync>;
pub type ChannelHandler = Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(LinkState) + Send + Sync>;
pub type MessageHandler = Box<dyn Fn(String) + Send + Sync>;
pub type EventHandler = Box<dyn Fn() + Send + Sync>;

/// An established (or establishing) byte/string channel to one remote peer
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn is_open(&self) -> bool;
    fn send(&self, data: &str) -> Result<(), TransportError>;
    fn set_on_message(&self, handler: MessageHandler);
    fn set_on_open(&self, handler: EventHandler);
    fn set_on_close(&self, handler: EventHandler);
    fn close(&self);
}

/// One peer-to-peer connection attempt and its channels
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an outbound channel (offerer side)
    fn create_channel(&self, config: &ChannelConfig) -> Result<Arc<dyn DataChannel>, TransportError>;
    /// Produce the local offer
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    /// Apply a remote offer and produce the answer (answerer side)
    async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError>;
    /// Apply the remote answer (offerer side)
    async fn accept_answer(&self, answer: &SessionDescription) -> Result<(), TransportError>;
    /// Apply a remote reachability candidate
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;
    fn set_on_ice_candidate(&self, handler: CandidateHandler);
    /// Inbound channels surface here on the answerer side
    fn set_on_channel(&self, handler: ChannelHandler);
    fn set_on_state_change(&self, handler: StateHandler);
    fn state(&self) -> LinkState;
    fn close(&self);
}

/// Factory for peer links
pub trait Transport: Send + Sync {
    fn new_link(&self) -> Result<Arc<dyn PeerLink>, TransportError>;
}
