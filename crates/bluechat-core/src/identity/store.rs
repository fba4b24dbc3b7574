//! Process-stable peer identity
//!
//! The identity is generated on first use and persisted; later calls (and
//! later runs, given persistent storage) return the same value. Losing the
//! stored value only makes this installation look like a new peer, so storage
//! failures never surface as errors.

use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::identity::storage::IdentityStorage;
use crate::protocol;
use crate::types::PeerIdentity;

/// Storage key holding the random identity component
pub const IDENTITY_KEY: &str = "unique_uuid";

struct Inner<S> {
    storage: S,
    cached: Option<PeerIdentity>,
}

/// Generates, persists and serves the local peer identity
pub struct IdentityStore<S: IdentityStorage> {
    inner: Mutex<Inner<S>>,
}

impl<S: IdentityStorage> IdentityStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                storage,
                cached: None,
            }),
        }
    }

    /// Return the persisted identity, creating and persisting one on first call
    pub fn get_or_create_identity(&self) -> PeerIdentity {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(identity) = inner.cached {
            return identity;
        }

        let identity = match inner.storage.retrieve(IDENTITY_KEY) {
            Ok(Some(stored)) => match stored.parse::<PeerIdentity>() {
                Ok(identity) if !protocol::is_reserved(identity.random_part()) => {
                    debug!("Loaded persisted identity {}", identity);
                    Some(identity)
                }
                _ => {
                    warn!("Persisted identity {:?} is unusable, regenerating", stored);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read persisted identity, regenerating: {}", e);
                None
            }
        };

        let identity = match identity {
            Some(identity) => identity,
            None => {
                let identity = generate_identity();
                if let Err(e) = inner.storage.store(IDENTITY_KEY, &identity.to_string()) {
                    warn!("Failed to persist identity {}: {}", identity, e);
                }
                info!("Generated new peer identity {}", identity);
                identity
            }
        };

        // Publish only after the write above has completed
        inner.cached = Some(identity);
        identity
    }

    /// Advertised identifier for the local identity
    pub fn advertised_identifier(&self) -> String {
        protocol::build_advertised_identifier(&self.get_or_create_identity())
    }
}

/// Draw a fresh random component from a v4 UUID, skipping reserved values
pub fn generate_identity() -> PeerIdentity {
    loop {
        let bytes = uuid::Uuid::new_v4().into_bytes();
        let random = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if !protocol::is_reserved(random) {
            return PeerIdentity::new(random);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::storage::{FileStorage, MemoryStorage};

    #[test]
    fn test_identity_is_idempotent() {
        let store = IdentityStore::new(MemoryStorage::new());
        let first = store.get_or_create_identity();
        let second = store.get_or_create_identity();
        assert_eq!(first, second);
        assert!(!first.is_unattributed());
    }

    #[test]
    fn test_identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");

        let first = IdentityStore::new(FileStorage::new(&path)).get_or_create_identity();
        let second = IdentityStore::new(FileStorage::new(&path)).get_or_create_identity();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_value_is_used() {
        let mut storage = MemoryStorage::new();
        storage.store(IDENTITY_KEY, "cafe0001").unwrap();
        let store = IdentityStore::new(storage);
        assert_eq!(store.get_or_create_identity(), PeerIdentity::new(0xcafe0001));
        assert_eq!(
            store.advertised_identifier(),
            "cafe0001-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_corrupt_value_regenerates() {
        let mut storage = MemoryStorage::new();
        storage.store(IDENTITY_KEY, "not-hex!").unwrap();
        let store = IdentityStore::new(storage);
        let identity = store.get_or_create_identity();
        assert_ne!(identity.to_string(), "not-hex!");
    }

    #[test]
    fn test_unavailable_storage_still_yields_stable_identity() {
        let store = IdentityStore::new(MemoryStorage::unavailable());
        let first = store.get_or_create_identity();
        assert_eq!(store.get_or_create_identity(), first);
    }
}
