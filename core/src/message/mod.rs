// Message module — the relay unit and its wire codec

pub mod codec;
pub mod types;

pub use codec::{decode, encode, CodecError};
pub use types::{
    AckPayload, MeshMessage, MessageType, SosPayload, ACK_PRIORITY, ACK_TTL, DEFAULT_PRIORITY,
    DEFAULT_TTL, MAX_PAYLOAD_BYTES, SOS_PRIORITY,
};
