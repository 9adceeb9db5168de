//! JSON file store.
//!
//! ```json
//! {
//!   "credentials": { "android_id": "123", "security_token": "456" },
//!   "persistent_ids": ["0:1700000000%abc", "..."]
//! }
//! ```
//!
//! The whole document is rewritten on every mutation: first to a sibling
//! `.tmp` file, then renamed over the original, so a crash leaves either the
//! old or the new document and never a torn one.

use crate::credentials::Credentials;
use crate::error::StorageError;
use crate::store::{CredentialStore, PersistentIdStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    persistent_ids: Vec<String>,
}

#[derive(Debug, Default, Clone)]
struct State {
    credentials: Option<Credentials>,
    ids: HashSet<String>,
}

impl State {
    fn to_document(&self) -> Document {
        let mut persistent_ids: Vec<String> = self.ids.iter().cloned().collect();
        persistent_ids.sort();
        Document {
            credentials: self.credentials,
            persistent_ids,
        }
    }
}

/// Durable store persisted as a single JSON document.
pub struct FileStore {
    path: PathBuf,
    state: RwLock<State>,
}

impl FileStore {
    /// Opens the store at `path`, creating parent directories as needed.
    ///
    /// A missing file starts empty. An unreadable document is logged and
    /// replaced by an empty one on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let state = match Self::load(&path) {
            Ok(Some(doc)) => {
                tracing::debug!(
                    "Loaded {} persistent ids from {:?}",
                    doc.persistent_ids.len(),
                    path
                );
                State {
                    credentials: doc.credentials,
                    ids: doc.persistent_ids.into_iter().collect(),
                }
            }
            Ok(None) => State::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable store {:?}: {}", path, e);
                State::default()
            }
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Returns the document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Option<Document>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Writes `state` to disk. Callers hold the write lock so that persists
    /// happen in the same order as the mutations they reflect.
    fn persist(&self, state: &State) -> Result<(), StorageError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &state.to_document())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Applies `f` to a copy of the state and installs the copy only once
    /// it is on disk. A failed persist leaves the store unchanged.
    fn mutate<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut State) -> bool,
    {
        let mut state = self.state.write();
        let mut next = state.clone();
        if f(&mut next) {
            self.persist(&next)?;
            *state = next;
        }
        Ok(())
    }
}

impl PersistentIdStore for FileStore {
    fn all_persistent_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.state.read().ids.iter().cloned().collect())
    }

    fn has_persistent_id(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.state.read().ids.contains(id))
    }

    fn add_persistent_id(&self, id: &str) -> Result<(), StorageError> {
        self.mutate(|state| state.ids.insert(id.to_string()))
    }

    fn clear_persistent_ids(&self) -> Result<(), StorageError> {
        self.mutate(|state| {
            let changed = !state.ids.is_empty();
            state.ids.clear();
            changed
        })
    }
}

impl CredentialStore for FileStore {
    fn credentials(&self) -> Result<Option<Credentials>, StorageError> {
        Ok(self.state.read().credentials)
    }

    fn set_credentials(&self, credentials: Credentials) -> Result<(), StorageError> {
        self.mutate(|state| {
            let changed = state.credentials != Some(credentials);
            state.credentials = Some(credentials);
            changed
        })?;
        tracing::debug!("Stored credentials for device {}", credentials.android_id);
        Ok(())
    }
}
