// Message types — the unit every mesh node stores and forwards

use serde::{Deserialize, Serialize};

/// Maximum payload size in UTF-8 encoded bytes
pub const MAX_PAYLOAD_BYTES: usize = 512;

/// Default hop budget for originated messages
pub const DEFAULT_TTL: i32 = 6;

/// Hop budget for acknowledgments — a direct reply, never relayed onward
pub const ACK_TTL: i32 = 1;

/// Default priority for generic messages
pub const DEFAULT_PRIORITY: u8 = 5;

/// Priority of an SOS — the most urgent thing the mesh carries
pub const SOS_PRIORITY: u8 = 10;

/// Priority of an acknowledgment
pub const ACK_PRIORITY: u8 = 9;

/// What kind of relay unit this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Emergency alert with the sender's position
    Sos,
    /// Position update
    Location,
    /// Augmented-reality scene update
    ArUpdate,
    /// Delivery acknowledgment for a previously seen message
    Ack,
}

/// A relay unit. Immutable once created — relaying produces a fresh copy
/// via [`MeshMessage::decrement_ttl`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshMessage {
    /// Globally unique id, generated by the originator
    pub msg_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Ephemeral per-session identity of the originating device.
    /// Not a stable user id.
    pub sender_id: String,
    /// Creation time in unix millis, originator clock
    pub timestamp: u64,
    /// Remaining hop budget. Relayed only while positive after decrement.
    pub ttl: i32,
    /// 1–10, 10 = most urgent
    pub priority: u8,
    /// Opaque encoded payload, at most [`MAX_PAYLOAD_BYTES`] UTF-8 bytes
    pub payload: String,
    /// Building floor of the sender
    #[serde(default)]
    pub floor: i32,
}

/// Position carried by an SOS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SosPayload {
    pub lat: f64,
    pub lng: f64,
}

/// Payload of an acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Id of the message being acknowledged
    pub ack_for: String,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl MeshMessage {
    /// Create a generic message with default priority, ttl and floor
    pub fn new(kind: MessageType, sender_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            kind,
            sender_id: sender_id.into(),
            timestamp: now_millis(),
            ttl: DEFAULT_TTL,
            priority: DEFAULT_PRIORITY,
            payload: payload.into(),
            floor: 0,
        }
    }

    /// Create an SOS at the given position
    pub fn sos(sender_id: impl Into<String>, lat: f64, lng: f64, floor: i32) -> Self {
        let payload = serde_json::to_string(&SosPayload { lat, lng }).unwrap_or_default();
        Self {
            priority: SOS_PRIORITY,
            floor,
            ..Self::new(MessageType::Sos, sender_id, payload)
        }
    }

    /// Create an acknowledgment for a previously received message
    pub fn ack(sender_id: impl Into<String>, original_msg_id: &str) -> Self {
        let payload = serde_json::to_string(&AckPayload {
            ack_for: original_msg_id.to_string(),
        })
        .unwrap_or_default();
        Self {
            priority: ACK_PRIORITY,
            ttl: ACK_TTL,
            ..Self::new(MessageType::Ack, sender_id, payload)
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: i32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_floor(mut self, floor: i32) -> Self {
        self.floor = floor;
        self
    }

    /// Copy for rebroadcast: ttl reduced by one, every other field unchanged
    pub fn decrement_ttl(&self) -> Self {
        Self {
            ttl: self.ttl - 1,
            ..self.clone()
        }
    }

    /// Semantic invariants, checked separately from wire shape: a
    /// structurally well-formed message can still violate these. Invalid
    /// messages are never stored, emitted, or relayed.
    pub fn is_valid(&self) -> bool {
        self.payload.len() <= MAX_PAYLOAD_BYTES
            && (1..=10).contains(&self.priority)
            && self.ttl >= 0
    }

    /// The message id an ACK acknowledges, when this is a parseable ACK
    pub fn ack_target(&self) -> Option<String> {
        if self.kind != MessageType::Ack {
            return None;
        }
        serde_json::from_str::<AckPayload>(&self.payload)
            .ok()
            .map(|p| p.ack_for)
    }

    /// The position carried by an SOS, when this is a parseable SOS
    pub fn sos_position(&self) -> Option<SosPayload> {
        if self.kind != MessageType::Sos {
            return None;
        }
        serde_json::from_str(&self.payload).ok()
    }
}
