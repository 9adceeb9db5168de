//! Store traits.

use crate::credentials::Credentials;
use crate::error::StorageError;

/// Durable set of persistent ids of already-delivered data messages.
///
/// Every operation is atomic and serializable with respect to every other
/// operation on the same store. A write returns only after its effect is
/// visible to later reads, including reads from other handles sharing the
/// store.
pub trait PersistentIdStore: Send + Sync {
    /// Returns every recorded id, in no particular order.
    fn all_persistent_ids(&self) -> Result<Vec<String>, StorageError>;

    fn has_persistent_id(&self, id: &str) -> Result<bool, StorageError>;

    fn add_persistent_id(&self, id: &str) -> Result<(), StorageError>;

    fn clear_persistent_ids(&self) -> Result<(), StorageError>;
}

/// Holder of the device credentials.
pub trait CredentialStore: Send + Sync {
    fn credentials(&self) -> Result<Option<Credentials>, StorageError>;

    fn set_credentials(&self, credentials: Credentials) -> Result<(), StorageError>;
}

impl<T: PersistentIdStore + ?Sized> PersistentIdStore for std::sync::Arc<T> {
    fn all_persistent_ids(&self) -> Result<Vec<String>, StorageError> {
        (**self).all_persistent_ids()
    }

    fn has_persistent_id(&self, id: &str) -> Result<bool, StorageError> {
        (**self).has_persistent_id(id)
    }

    fn add_persistent_id(&self, id: &str) -> Result<(), StorageError> {
        (**self).add_persistent_id(id)
    }

    fn clear_persistent_ids(&self) -> Result<(), StorageError> {
        (**self).clear_persistent_ids()
    }
}

impl<T: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<T> {
    fn credentials(&self) -> Result<Option<Credentials>, StorageError> {
        (**self).credentials()
    }

    fn set_credentials(&self, credentials: Credentials) -> Result<(), StorageError> {
        (**self).set_credentials(credentials)
    }
}
