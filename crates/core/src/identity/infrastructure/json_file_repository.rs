use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::embedding::domain::embedding::EmbeddingVector;
use crate::identity::domain::identity::{Identity, IdentityId};
use crate::identity::domain::identity_repository::{IdentityRepository, RepositoryError};

/// Stores all identities as one pretty-printed JSON array.
///
/// Every mutation is read-modify-write against the file on disk, so edits
/// made by other processes between writes are preserved. Writes go to a
/// `.part` sibling and are renamed into place.
pub struct JsonFileRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Identity>, RepositoryError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&json).map_err(|source| RepositoryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, identities: &[Identity]) -> Result<(), RepositoryError> {
        let io_err = |source| RepositoryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(identities).map_err(|source| {
            RepositoryError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        let temp_path = self.path.with_extension("part");
        fs::write(&temp_path, json).map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)
    }

    fn modify<F>(&self, id: IdentityId, apply: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut Identity) -> Result<(), RepositoryError>,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut identities = self.read()?;
        let record = identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(RepositoryError::NotFound(id))?;
        apply(record)?;
        self.write(&identities)
    }
}

impl IdentityRepository for JsonFileRepository {
    fn load_all(&self) -> Result<Vec<Identity>, RepositoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read()
    }

    fn create(&self, identity: &Identity) -> Result<(), RepositoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut identities = self.read()?;
        if identities.iter().any(|i| i.id == identity.id) {
            return Err(RepositoryError::AlreadyExists(identity.id));
        }
        identities.push(identity.clone());
        self.write(&identities)
    }

    fn append_embedding(
        &self,
        id: IdentityId,
        embedding: &EmbeddingVector,
    ) -> Result<(), RepositoryError> {
        self.modify(id, |record| {
            record
                .push_embedding(embedding.clone())
                .map_err(|e| RepositoryError::Unavailable(e.to_string()))
        })
    }

    fn update(&self, identity: &Identity) -> Result<(), RepositoryError> {
        self.modify(identity.id, |record| {
            *record = identity.clone();
            Ok(())
        })
    }
}
