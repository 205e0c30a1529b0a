// Session identity — who this device is for the duration of one session

use crate::store::StorageBackend;
use std::sync::Arc;
use tracing::debug;

const SENDER_ID_KEY: &[u8] = b"session_sender_id";

/// Ephemeral per-session sender identity. Not a stable user id, and not
/// meant to survive across independent sessions on the same device.
///
/// Identities are assumed unique across devices; there is no collision
/// detection or resolution. A collision would make the colliding devices
/// drop each other's messages as their own echo.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    id: String,
}

impl SessionIdentity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Self {
            id: format!("peer-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Reuse the identity cached in a session-scoped store, generating and
    /// caching a fresh one when the store is empty or unavailable.
    pub fn from_store_or_generate(store: &Arc<dyn StorageBackend>) -> Self {
        match store.get(SENDER_ID_KEY) {
            Ok(Some(bytes)) => {
                if let Ok(id) = String::from_utf8(bytes) {
                    debug!("reusing cached session identity {id}");
                    return Self { id };
                }
            }
            Ok(None) => {}
            Err(e) => debug!("session identity cache unavailable ({e}), generating"),
        }

        let identity = Self::generate();
        if let Err(e) = store.put(SENDER_ID_KEY, identity.id.as_bytes()) {
            debug!("failed to cache session identity ({e})");
        }
        identity
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    #[test]
    fn test_generate_is_unique() {
        let a = SessionIdentity::generate();
        let b = SessionIdentity::generate();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("peer-"));
    }

    #[test]
    fn test_cached_identity_is_reused() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let first = SessionIdentity::from_store_or_generate(&store);
        let second = SessionIdentity::from_store_or_generate(&store);
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_fresh_store_generates() {
        let store_a: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let store_b: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let a = SessionIdentity::from_store_or_generate(&store_a);
        let b = SessionIdentity::from_store_or_generate(&store_b);
        assert_ne!(a.id(), b.id());
    }
}
