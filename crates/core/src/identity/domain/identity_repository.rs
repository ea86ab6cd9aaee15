use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::embedding::domain::embedding::EmbeddingVector;

use super::identity::{Identity, IdentityId};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("identity {0} already exists in storage")]
    AlreadyExists(IdentityId),
    #[error("identity {0} not found in storage")]
    NotFound(IdentityId),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt identity file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage behind the identity store.
///
/// Storage may be written by other processes, so the store never assumes
/// its in-memory view is complete and relies on `load_all` for reloads.
pub trait IdentityRepository: Send + Sync {
    fn load_all(&self) -> Result<Vec<Identity>, RepositoryError>;

    /// Persists a new identity. Fails with `AlreadyExists` if the id is taken.
    fn create(&self, identity: &Identity) -> Result<(), RepositoryError>;

    fn append_embedding(
        &self,
        id: IdentityId,
        embedding: &EmbeddingVector,
    ) -> Result<(), RepositoryError>;

    /// Replaces the stored record with the same id.
    fn update(&self, identity: &Identity) -> Result<(), RepositoryError>;
}

impl<R: IdentityRepository + ?Sized> IdentityRepository for Arc<R> {
    fn load_all(&self) -> Result<Vec<Identity>, RepositoryError> {
        (**self).load_all()
    }

    fn create(&self, identity: &Identity) -> Result<(), RepositoryError> {
        (**self).create(identity)
    }

    fn append_embedding(
        &self,
        id: IdentityId,
        embedding: &EmbeddingVector,
    ) -> Result<(), RepositoryError> {
        (**self).append_embedding(id, embedding)
    }

    fn update(&self, identity: &Identity) -> Result<(), RepositoryError> {
        (**self).update(identity)
    }
}
