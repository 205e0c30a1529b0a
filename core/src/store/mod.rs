// Store module — durable dedup ledger and its storage backends

pub mod backend;
pub mod ledger;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use ledger::{LedgerError, MessageLedger, StoreRecord};
