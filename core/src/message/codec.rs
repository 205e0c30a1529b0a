// Message codec — JSON wire format
//
// Inbound frames come from untrusted peers over a lossy transport, so
// decoding never fails loudly: anything that is not a structurally complete
// message is simply absent.

use super::types::MeshMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Serialize a message for the wire
pub fn encode(msg: &MeshMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Parse a wire frame. Requires every field present with the right primitive
/// kind (`floor` defaults to 0); returns `None` on any parse or shape
/// failure. Semantic invariants are a separate check —
/// [`MeshMessage::is_valid`].
pub fn decode(raw: &str) -> Option<MeshMessage> {
    serde_json::from_str(raw).ok()
}
