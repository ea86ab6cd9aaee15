use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::capture::domain::camera_config::CameraRef;
use crate::embedding::domain::embedding::EmbeddingVector;
use crate::events::domain::identity_event::{EventKind, EventPublisher, IdentityEvent};
use crate::identity::domain::identity::{Identity, IdentityId};
use crate::identity::domain::identity_store::{IdentityStore, IdentityStoreError, InsertOutcome};
use crate::identity::domain::matcher::{MatchResult, RegistrySnapshot};
use crate::registration::domain::description::{
    extract_known_breed, Description, DescriptionService,
};
use crate::registration::domain::name_generator::generate_name;
use crate::registration::domain::photo_store::PhotoStore;
use crate::shared::category::Category;
use crate::shared::clock::unix_millis;
use crate::shared::frame::Frame;
use crate::tracking::domain::track::TrackId;

/// Inserts that collide with an out-of-band writer are retried this many
/// times before giving up.
const MAX_INSERT_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error(transparent)]
    Store(#[from] IdentityStoreError),
}

/// Everything needed to register one subject.
#[derive(Clone, Debug)]
pub struct RegistrationCandidate {
    pub crop: Frame,
    pub embedding: EmbeddingVector,
    pub category: Category,
    /// `None` for manual enrollment.
    pub camera: Option<CameraRef>,
    pub track_id: Option<TrackId>,
}

#[derive(Debug)]
pub enum RegistrationOutcome {
    Registered(Identity),
    /// The subject was already known; nothing was created.
    Matched(MatchResult),
}

/// Turns a candidate into a new identity, unless the registry already
/// holds it.
///
/// Used by camera workers for stable unknown tracks and by manual
/// enrollment. The dedup decision is made inside the store's write
/// boundary, so concurrent callers with the same subject produce one
/// identity. Descriptions are fetched after the insert on a helper thread
/// and written back through the store; `confirm` never waits for them.
pub struct AutoRegistrar {
    store: Arc<IdentityStore>,
    photos: Arc<dyn PhotoStore>,
    events: Arc<dyn EventPublisher>,
    describer: Option<Arc<dyn DescriptionService>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    dedup_threshold: f64,
}

impl AutoRegistrar {
    pub fn new(
        store: Arc<IdentityStore>,
        photos: Arc<dyn PhotoStore>,
        events: Arc<dyn EventPublisher>,
        dedup_threshold: f64,
    ) -> Self {
        Self {
            store,
            photos,
            events,
            describer: None,
            pending: Mutex::new(Vec::new()),
            dedup_threshold,
        }
    }

    /// Enables descriptions. The service bounds each request itself.
    pub fn with_descriptions(mut self, describer: Arc<dyn DescriptionService>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    pub fn dedup_threshold(&self) -> f64 {
        self.dedup_threshold
    }

    pub fn confirm(
        &self,
        candidate: &RegistrationCandidate,
        name: Option<&str>,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        if let Some(existing) = self.find_existing(&self.store.snapshot(), candidate) {
            log::debug!(
                "Candidate matches identity {} ({:.3}), not registering",
                existing.identity_id,
                existing.similarity
            );
            return Ok(RegistrationOutcome::Matched(existing));
        }

        let mut photo: Option<PathBuf> = None;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let id = self.store.allocate_id();
            let snapshot = self.store.snapshot();
            let chosen_name = match name {
                Some(given) => given.trim().to_string(),
                None => generate_name(candidate.category, id, |n| snapshot.name_in_use(n, None)),
            };
            if photo.is_none() {
                photo = self.save_photo(&candidate.crop, &chosen_name);
            }

            let mut identity = Identity::new(
                id,
                chosen_name,
                candidate.category,
                candidate.embedding.clone(),
                unix_millis(),
            );
            identity.photo_path = photo.clone();

            match self
                .store
                .insert_unless_matched(identity, self.dedup_threshold)
            {
                Ok(InsertOutcome::Inserted(identity)) => {
                    self.announce(&identity, candidate);
                    self.describe_later(identity.id, candidate);
                    return Ok(RegistrationOutcome::Registered(identity));
                }
                Ok(InsertOutcome::AlreadyKnown(existing)) => {
                    self.discard_photo(photo.take());
                    return Ok(RegistrationOutcome::Matched(existing));
                }
                Err(IdentityStoreError::DuplicateIdentity(taken))
                    if attempt < MAX_INSERT_ATTEMPTS =>
                {
                    log::warn!("Identity id {taken} was taken by another writer, reloading");
                    self.store.reload()?;
                    if let Some(existing) = self.find_existing(&self.store.snapshot(), candidate)
                    {
                        self.discard_photo(photo.take());
                        return Ok(RegistrationOutcome::Matched(existing));
                    }
                }
                Err(IdentityStoreError::NameTaken(taken))
                    if name.is_none() && attempt < MAX_INSERT_ATTEMPTS =>
                {
                    log::debug!("Generated name {taken} was taken meanwhile, retrying");
                }
                Err(e) => {
                    self.discard_photo(photo.take());
                    return Err(e.into());
                }
            }
        }
    }

    fn find_existing(
        &self,
        snapshot: &RegistrySnapshot,
        candidate: &RegistrationCandidate,
    ) -> Option<MatchResult> {
        snapshot
            .best_match(&candidate.embedding, Some(candidate.category))
            .filter(|m| m.meets(self.dedup_threshold))
    }

    /// Blocks until every description request started so far has been
    /// written back or has failed.
    pub fn wait_for_descriptions(&self) {
        let handles = std::mem::take(&mut *self.lock_pending());
        for handle in handles {
            if handle.join().is_err() {
                log::warn!("Description thread panicked");
            }
        }
    }

    fn describe_later(&self, id: IdentityId, candidate: &RegistrationCandidate) {
        let Some(describer) = &self.describer else {
            return;
        };
        let describer = Arc::clone(describer);
        let store = Arc::clone(&self.store);
        let crop = candidate.crop.clone();
        let category = candidate.category;
        let spawned = thread::Builder::new()
            .name(format!("describe-{id}"))
            .spawn(move || match describer.describe(&crop, category) {
                Ok(description) => store_description(&store, id, category, &description),
                Err(e) => log::warn!("Description of identity {id} failed: {e}"),
            });
        match spawned {
            Ok(handle) => {
                let mut pending = self.lock_pending();
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(e) => log::warn!("Could not start description request for {id}: {e}"),
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save_photo(&self, crop: &Frame, name: &str) -> Option<PathBuf> {
        match self.photos.save(crop, name) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Could not save photo for {name}: {e}");
                None
            }
        }
    }

    fn discard_photo(&self, photo: Option<PathBuf>) {
        if let Some(path) = photo {
            self.photos.discard(&path);
        }
    }

    fn announce(&self, identity: &Identity, candidate: &RegistrationCandidate) {
        let kind = if candidate.track_id.is_some() {
            EventKind::AutoRegistered
        } else {
            EventKind::Registered
        };
        self.events.publish(IdentityEvent::for_identity(
            kind,
            identity,
            candidate.camera.as_ref(),
            candidate.track_id,
            None,
            identity.created_at_ms,
        ));
    }
}

fn store_description(
    store: &IdentityStore,
    id: IdentityId,
    category: Category,
    description: &Description,
) {
    if description.is_empty() {
        return;
    }
    let text = Some(description.text.clone()).filter(|t| !t.is_empty());
    let (breed, weight) = if category == Category::Animal {
        (
            description
                .breed
                .clone()
                .or_else(|| extract_known_breed(&description.text)),
            description.estimated_weight_kg,
        )
    } else {
        (None, None)
    };
    match store.set_description(id, text, breed, weight) {
        Ok(_) => log::debug!("Stored description for identity {id}"),
        Err(e) => log::warn!("Could not store description for identity {id}: {e}"),
    }
}
