use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, RwLock};

use thiserror::Error;

use crate::embedding::domain::embedding::EmbeddingVector;

use super::identity::{Identity, IdentityError, IdentityId};
use super::identity_repository::{IdentityRepository, RepositoryError};
use super::matcher::{MatchResult, RegistrySnapshot};

#[derive(Error, Debug)]
pub enum IdentityStoreError {
    #[error("identity {0} already exists")]
    DuplicateIdentity(IdentityId),
    #[error("the name '{0}' is already in use")]
    NameTaken(String),
    #[error("identity {0} not found")]
    NotFound(IdentityId),
    #[error(transparent)]
    Invalid(#[from] IdentityError),
    #[error("storage error: {0}")]
    Repository(#[source] RepositoryError),
}

impl From<RepositoryError> for IdentityStoreError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::AlreadyExists(id) => IdentityStoreError::DuplicateIdentity(id),
            RepositoryError::NotFound(id) => IdentityStoreError::NotFound(id),
            other => IdentityStoreError::Repository(other),
        }
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Identity),
    /// The candidate matched an identity already in the registry; nothing
    /// was written.
    AlreadyKnown(MatchResult),
}

/// The single registry of known identities.
///
/// Readers take cheap [`RegistrySnapshot`]s and never block on writers for
/// longer than a pointer swap. Writers are serialized by `write_gate`,
/// commit to the repository first, then publish a new snapshot, so a
/// snapshot never shows a write that failed to persist.
pub struct IdentityStore {
    repository: Box<dyn IdentityRepository>,
    current: RwLock<RegistrySnapshot>,
    /// Next id to hand out. Also the mutual-exclusion boundary for writes.
    write_gate: Mutex<u64>,
}

impl IdentityStore {
    /// Loads every identity from the repository.
    pub fn open(repository: Box<dyn IdentityRepository>) -> Result<Self, IdentityStoreError> {
        let store = Self {
            repository,
            current: RwLock::new(RegistrySnapshot::default()),
            write_gate: Mutex::new(1),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves an id no committed identity uses. Ids are never reused
    /// within a process, even if the reservation is abandoned.
    pub fn allocate_id(&self) -> IdentityId {
        let mut next = self.gate();
        let id = IdentityId(*next);
        *next += 1;
        id
    }

    pub fn insert(&self, identity: Identity) -> Result<Identity, IdentityStoreError> {
        let mut gate = self.gate();
        self.insert_locked(&mut gate, identity)
    }

    /// Re-matches the candidate against the committed registry inside the
    /// write boundary and inserts it only if no identity of the same
    /// category scores at or above `threshold` on any of its vectors.
    pub fn insert_unless_matched(
        &self,
        identity: Identity,
        threshold: f64,
    ) -> Result<InsertOutcome, IdentityStoreError> {
        let mut gate = self.gate();
        let snapshot = self.snapshot();
        let existing = identity
            .embeddings()
            .iter()
            .filter_map(|e| snapshot.best_match(e, Some(identity.category)))
            .filter(|m| m.meets(threshold))
            .max_by(|a, b| {
                a.similarity
                    .partial_cmp(&b.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(existing) = existing {
            return Ok(InsertOutcome::AlreadyKnown(existing));
        }
        self.insert_locked(&mut gate, identity)
            .map(InsertOutcome::Inserted)
    }

    pub fn add_embedding(
        &self,
        id: IdentityId,
        embedding: EmbeddingVector,
    ) -> Result<Identity, IdentityStoreError> {
        let _gate = self.gate();
        let mut updated = self.current_record(id)?;
        updated.push_embedding(embedding.clone())?;
        self.repository.append_embedding(id, &embedding)?;
        Ok(self.publish_record(updated))
    }

    pub fn rename(&self, id: IdentityId, name: &str) -> Result<Identity, IdentityStoreError> {
        let name = name.trim();
        let _gate = self.gate();
        let mut updated = self.current_record(id)?;
        if name.is_empty() {
            return Err(IdentityError::EmptyName(id).into());
        }
        let snapshot = self.snapshot();
        if snapshot.name_in_use(name, Some(id)) {
            return Err(IdentityStoreError::NameTaken(name.to_string()));
        }
        updated.name = name.to_string();
        self.commit_update(updated)
    }

    pub fn set_photo(&self, id: IdentityId, photo: PathBuf) -> Result<Identity, IdentityStoreError> {
        let _gate = self.gate();
        let mut updated = self.current_record(id)?;
        updated.photo_path = Some(photo);
        self.commit_update(updated)
    }

    pub fn set_description(
        &self,
        id: IdentityId,
        description: Option<String>,
        breed: Option<String>,
        estimated_weight_kg: Option<f64>,
    ) -> Result<Identity, IdentityStoreError> {
        let _gate = self.gate();
        let mut updated = self.current_record(id)?;
        updated.description = description;
        updated.breed = breed;
        updated.estimated_weight_kg = estimated_weight_kg;
        self.commit_update(updated)
    }

    /// Replaces the in-memory view with whatever storage holds now.
    ///
    /// Records that fail validation are skipped with a warning rather than
    /// taking the whole registry down.
    pub fn reload(&self) -> Result<usize, IdentityStoreError> {
        let mut gate = self.gate();
        let records = self.repository.load_all()?;

        let mut map = BTreeMap::new();
        for mut identity in records {
            identity.renormalize_embeddings();
            if let Err(e) = identity.validate() {
                log::warn!("Skipping stored identity: {e}");
                continue;
            }
            if map.contains_key(&identity.id) {
                log::warn!("Skipping duplicate stored identity {}", identity.id);
                continue;
            }
            map.insert(identity.id, identity);
        }

        if let Some(max_id) = map.keys().next_back() {
            *gate = (*gate).max(max_id.0 + 1);
        }
        let count = map.len();
        self.publish(map);
        log::debug!("Identity store reloaded: {count} identities");
        Ok(count)
    }

    fn insert_locked(
        &self,
        next_id: &mut MutexGuard<'_, u64>,
        identity: Identity,
    ) -> Result<Identity, IdentityStoreError> {
        identity.validate()?;
        let snapshot = self.snapshot();
        if snapshot.contains(identity.id) {
            return Err(IdentityStoreError::DuplicateIdentity(identity.id));
        }
        if snapshot.name_in_use(&identity.name, None) {
            return Err(IdentityStoreError::NameTaken(identity.name.clone()));
        }

        self.repository.create(&identity)?;

        **next_id = (**next_id).max(identity.id.0 + 1);
        let mut map = snapshot.to_map();
        map.insert(identity.id, identity.clone());
        self.publish(map);
        log::info!(
            "Registered {} {} ({})",
            identity.category,
            identity.id,
            identity.name
        );
        Ok(identity)
    }

    fn current_record(&self, id: IdentityId) -> Result<Identity, IdentityStoreError> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or(IdentityStoreError::NotFound(id))
    }

    fn commit_update(&self, updated: Identity) -> Result<Identity, IdentityStoreError> {
        self.repository.update(&updated)?;
        Ok(self.publish_record(updated))
    }

    fn publish_record(&self, updated: Identity) -> Identity {
        let mut map = self.snapshot().to_map();
        map.insert(updated.id, updated.clone());
        self.publish(map);
        updated
    }

    /// Swaps in a new snapshot. The map is built by the caller, outside the
    /// lock, so readers wait only for the pointer swap.
    fn publish(&self, map: BTreeMap<IdentityId, Identity>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let version = current.version() + 1;
        *current = RegistrySnapshot::new(map, version);
    }

    fn gate(&self) -> MutexGuard<'_, u64> {
        self.write_gate.lock().unwrap_or_else(|e| e.into_inner())
    }
}
