use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::embedding::domain::embedding::EmbeddingVector;
use crate::identity::domain::identity::{Identity, IdentityId};
use crate::identity::domain::identity_repository::{IdentityRepository, RepositoryError};

/// Volatile repository for tests and ephemeral runs.
///
/// `write_external` mimics another process writing to shared storage, and
/// `set_unavailable` makes every write fail.
#[derive(Default)]
pub struct InMemoryRepository {
    records: Mutex<BTreeMap<IdentityId, Identity>>,
    unavailable: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let repo = Self::new();
        repo.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(identities.into_iter().map(|i| (i.id, i)));
        repo
    }

    /// Inserts or replaces a record without going through the store.
    pub fn write_external(&self, identity: Identity) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.id, identity);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("in-memory repository is offline".into()))
        } else {
            Ok(())
        }
    }
}

impl IdentityRepository for InMemoryRepository {
    fn load_all(&self) -> Result<Vec<Identity>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }

    fn create(&self, identity: &Identity) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&identity.id) {
            return Err(RepositoryError::AlreadyExists(identity.id));
        }
        records.insert(identity.id, identity.clone());
        Ok(())
    }

    fn append_embedding(
        &self,
        id: IdentityId,
        embedding: &EmbeddingVector,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        record
            .push_embedding(embedding.clone())
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))
    }

    fn update(&self, identity: &Identity) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(&identity.id)
            .ok_or(RepositoryError::NotFound(identity.id))?;
        *record = identity.clone();
        Ok(())
    }
}
