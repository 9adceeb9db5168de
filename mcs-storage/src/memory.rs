//! In-memory store.

use crate::credentials::Credentials;
use crate::error::StorageError;
use crate::store::{CredentialStore, PersistentIdStore};
use parking_lot::RwLock;
use std::collections::HashSet;

/// Volatile store backed by a locked set.
///
/// Dedup state does not survive a restart; suitable for tests and for
/// listeners that accept redelivery after a process restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ids: RwLock<HashSet<String>>,
    credentials: RwLock<Option<Credentials>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `credentials`.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            ids: RwLock::new(HashSet::new()),
            credentials: RwLock::new(Some(credentials)),
        }
    }

    /// Returns the number of recorded ids.
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }
}

impl PersistentIdStore for MemoryStore {
    fn all_persistent_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.ids.read().iter().cloned().collect())
    }

    fn has_persistent_id(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.ids.read().contains(id))
    }

    fn add_persistent_id(&self, id: &str) -> Result<(), StorageError> {
        self.ids.write().insert(id.to_string());
        Ok(())
    }

    fn clear_persistent_ids(&self) -> Result<(), StorageError> {
        self.ids.write().clear();
        Ok(())
    }
}

impl CredentialStore for MemoryStore {
    fn credentials(&self) -> Result<Option<Credentials>, StorageError> {
        Ok(*self.credentials.read())
    }

    fn set_credentials(&self, credentials: Credentials) -> Result<(), StorageError> {
        *self.credentials.write() = Some(credentials);
        Ok(())
    }
}
