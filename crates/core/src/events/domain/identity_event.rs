use serde::{Deserialize, Serialize};

use crate::capture::domain::camera_config::{CameraId, CameraRef};
use crate::identity::domain::identity::{Identity, IdentityId};
use crate::shared::category::Category;
use crate::tracking::domain::track::TrackId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Created by a camera worker from an unknown, stable track.
    AutoRegistered,
    /// Created through manual enrollment.
    Registered,
    /// A known identity was confirmed on a camera.
    Recognized,
}

/// The envelope delivered to subscribers, one JSON object per event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityEvent {
    pub event: EventKind,
    pub entity_type: Category,
    pub entity_id: IdentityId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<String>,
    pub camera_id: Option<CameraId>,
    pub camera_name: Option<String>,
    pub track_id: Option<TrackId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub timestamp_ms: u64,
}

impl IdentityEvent {
    pub fn for_identity(
        event: EventKind,
        identity: &Identity,
        camera: Option<&CameraRef>,
        track_id: Option<TrackId>,
        similarity: Option<f64>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            event,
            entity_type: identity.category,
            entity_id: identity.id,
            name: identity.name.clone(),
            description: identity.description.clone(),
            photo_path: identity
                .photo_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            camera_id: camera.map(|c| c.id),
            camera_name: camera.map(|c| c.name.clone()),
            track_id,
            similarity,
            timestamp_ms,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Anything that fans events out to observers. Publishing never blocks.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: IdentityEvent);
}
