use std::collections::VecDeque;
use std::time::Instant;

use crate::embedding::domain::embedding::EmbeddingVector;
use crate::identity::domain::identity::IdentityId;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::category::Category;
use crate::shared::frame::Frame;

/// Per-camera track number. Unique within one camera worker's lifetime.
pub type TrackId = u32;

/// Result of matching one detection against the registry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchOutcome {
    Known {
        identity_id: IdentityId,
        similarity: f64,
    },
    Unknown {
        best_similarity: Option<f64>,
    },
}

impl MatchOutcome {
    pub fn identity_id(&self) -> Option<IdentityId> {
        match self {
            MatchOutcome::Known { identity_id, .. } => Some(*identity_id),
            MatchOutcome::Unknown { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Observing,
    ConfirmedKnown(IdentityId),
    PendingRegistration,
    Registered(IdentityId),
}

/// The crop used to register a track, with its embedding.
#[derive(Clone, Debug)]
pub struct TrackSample {
    pub crop: Frame,
    pub embedding: EmbeddingVector,
    pub confidence: f64,
}

/// One subject followed across consecutive frames of one camera.
#[derive(Debug)]
pub struct Track {
    pub(super) id: TrackId,
    pub(super) category: Category,
    pub(super) bbox: BoundingBox,
    pub(super) last_seen: Instant,
    pub(super) outcomes: VecDeque<MatchOutcome>,
    pub(super) unknown_since: Option<Instant>,
    pub(super) state: TrackState,
    pub(super) best_sample: Option<TrackSample>,
    pub(super) registered_once: bool,
}

impl Track {
    pub(super) fn new(id: TrackId, category: Category, bbox: BoundingBox, now: Instant) -> Self {
        Self {
            id,
            category,
            bbox,
            last_seen: now,
            outcomes: VecDeque::new(),
            unknown_since: None,
            state: TrackState::Observing,
            best_sample: None,
            registered_once: false,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &MatchOutcome> {
        self.outcomes.iter()
    }

    pub fn best_sample(&self) -> Option<&TrackSample> {
        self.best_sample.as_ref()
    }

    /// Most recent similarity to a known identity, if the last outcome matched.
    pub fn last_similarity(&self) -> Option<f64> {
        match self.outcomes.back() {
            Some(MatchOutcome::Known { similarity, .. }) => Some(*similarity),
            _ => None,
        }
    }
}
