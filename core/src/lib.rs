// Haven — infrastructure-less emergency mesh relay
//
// When the building network is down, any device can broadcast an SOS and
// have it reach every reachable device through intermediate peers. No broker
// holds routing state: propagation is flooding, bounded by the dedup ledger,
// the hop-count ttl, and priority-jittered retransmission.

pub mod engine;
pub mod identity;
pub mod message;
pub mod signaling;
pub mod sim;
pub mod store;
pub mod transport;

pub use engine::{relay_window, EngineConfig, EngineError, MeshDelegate, MeshService, RelayEngine};
pub use identity::SessionIdentity;
pub use message::{MeshMessage, MessageType};
pub use sim::{ScriptedEngine, SimScript};
pub use store::{LedgerError, MessageLedger, StoreRecord};
