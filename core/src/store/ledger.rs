// Message ledger — per-device durable record of seen message ids
//
// The ledger is what bounds flooding: a message id that is already here is
// never re-emitted or re-relayed. Records also carry delivery and forward
// bookkeeping, and age out on a retention window regardless of either.

use super::backend::{MemoryStorage, SledStorage, StorageBackend};
use crate::message::{MeshMessage, MessageType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    #[error("Persistent storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// One record per seen message id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    /// The message body as received
    pub message: MeshMessage,
    /// Local receive time in unix millis — distinct from the originator's
    /// `message.timestamp`
    pub received_at: u64,
    /// Incremented once per relay attempt
    pub forwarded_count: u32,
    /// Set once an ACK referencing this id is seen
    pub delivered: bool,
    /// Denormalized for inspection without touching the payload
    pub priority: u8,
    pub kind: MessageType,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The dedup ledger. Exclusively owned by one engine instance per device —
/// there is no cross-device consistency to maintain.
pub struct MessageLedger {
    backend: Arc<dyn StorageBackend>,
    durable: bool,
}

impl MessageLedger {
    /// Open the persistent ledger at `path`. Fails with
    /// [`LedgerError::Unavailable`] when the platform offers no persistence;
    /// callers are expected to tolerate that and fall back to
    /// [`MessageLedger::in_memory`].
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let backend = SledStorage::new(path).map_err(LedgerError::Unavailable)?;
        Ok(Self {
            backend: Arc::new(backend),
            durable: true,
        })
    }

    /// In-memory ledger: dedup still works for the session, durability is
    /// lost across restarts.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryStorage::new()),
            durable: false,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Insert a record for a message. Returns true when newly created; an
    /// existing record is left untouched and yields false. Check and write
    /// commit atomically in the backend — two channels delivering the same
    /// message concurrently resolve to exactly one record.
    pub fn insert(&self, message: &MeshMessage) -> Result<bool, LedgerError> {
        let record = StoreRecord {
            message: message.clone(),
            received_at: now_millis(),
            forwarded_count: 0,
            delivered: false,
            priority: message.priority,
            kind: message.kind,
        };
        let bytes =
            bincode::serialize(&record).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.backend
            .put_if_absent(message.msg_id.as_bytes(), &bytes)
            .map_err(LedgerError::Storage)
    }

    /// Read-only membership test
    pub fn exists(&self, msg_id: &str) -> Result<bool, LedgerError> {
        Ok(self
            .backend
            .get(msg_id.as_bytes())
            .map_err(LedgerError::Storage)?
            .is_some())
    }

    /// Fetch a record for inspection
    pub fn get(&self, msg_id: &str) -> Result<Option<StoreRecord>, LedgerError> {
        match self.backend.get(msg_id.as_bytes()).map_err(LedgerError::Storage)? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Mark a message delivered. No-op when the id is absent — an ACK for an
    /// unknown or already-expired id never creates a record.
    pub fn mark_delivered(&self, msg_id: &str) -> Result<(), LedgerError> {
        self.update(msg_id, |record| record.delivered = true)
    }

    /// Bump the relay counter. No-op when the id is absent.
    pub fn increment_forward_count(&self, msg_id: &str) -> Result<(), LedgerError> {
        self.update(msg_id, |record| record.forwarded_count += 1)
    }

    fn update(&self, msg_id: &str, apply: impl FnOnce(&mut StoreRecord)) -> Result<(), LedgerError> {
        let Some(mut record) = self.get(msg_id)? else {
            return Ok(());
        };
        apply(&mut record);
        let bytes =
            bincode::serialize(&record).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.backend
            .put(msg_id.as_bytes(), &bytes)
            .map_err(LedgerError::Storage)
    }

    /// Remove every record received before `cutoff` (unix millis), whatever
    /// its delivery or relay status. Returns the exact removed count.
    pub fn delete_expired(&self, cutoff: u64) -> Result<usize, LedgerError> {
        let mut removed = 0;
        for (key, value) in self.backend.scan().map_err(LedgerError::Storage)? {
            let Ok(record) = bincode::deserialize::<StoreRecord>(&value) else {
                // an unreadable record is useless for dedup; drop it too
                self.backend.remove(&key).map_err(LedgerError::Storage)?;
                removed += 1;
                continue;
            };
            if record.received_at < cutoff {
                self.backend.remove(&key).map_err(LedgerError::Storage)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("expiry sweep removed {removed} record(s)");
        }
        Ok(removed)
    }

    /// All records, for inspection tooling
    pub fn records(&self) -> Result<Vec<StoreRecord>, LedgerError> {
        let mut records = Vec::new();
        for (_, value) in self.backend.scan().map_err(LedgerError::Storage)? {
            if let Ok(record) = bincode::deserialize::<StoreRecord>(&value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of records currently held
    pub fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.backend.scan().map_err(LedgerError::Storage)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    /// Flush and release the backing handle. Safe to call repeatedly.
    pub fn close(&self) {
        if let Err(e) = self.backend.flush() {
            debug!("ledger flush on close failed: {e}");
        }
    }
}
