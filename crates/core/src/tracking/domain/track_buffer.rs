use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::identity::domain::identity::IdentityId;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::category::Category;

use super::track::{MatchOutcome, Track, TrackId, TrackSample, TrackState};

#[derive(Clone, Debug, PartialEq)]
pub struct TrackBufferConfig {
    /// Outcomes kept per track.
    pub buffer_size: usize,
    /// How long a track must stay unknown before it may be registered.
    pub dwell: Duration,
    /// Tracks unseen for this long are dropped.
    pub idle_timeout: Duration,
    /// Minimum IoU to continue a track.
    pub iou_threshold: f64,
}

impl Default for TrackBufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 5,
            dwell: Duration::from_millis(1500),
            idle_timeout: Duration::from_secs(2),
            iou_threshold: 0.3,
        }
    }
}

/// Per-camera temporal smoothing of match outcomes.
///
/// Detections are tied to tracks purely by box overlap; each track keeps
/// a short history of outcomes and only changes state when that history
/// is convincing, so a single noisy frame never confirms or registers.
pub struct TrackBuffer {
    config: TrackBufferConfig,
    tracks: BTreeMap<TrackId, Track>,
    next_id: TrackId,
}

impl TrackBuffer {
    pub fn new(config: TrackBufferConfig) -> Self {
        Self {
            config: TrackBufferConfig {
                buffer_size: config.buffer_size.max(1),
                ..config
            },
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackBufferConfig {
        &self.config
    }

    /// Greedy IoU association of this frame's detections with live tracks.
    ///
    /// Pairs are taken in descending IoU order; a track or detection is
    /// used at most once and only within the same category. Unmatched
    /// detections start new tracks. Returns one track id per detection.
    pub fn associate(
        &mut self,
        detections: &[(BoundingBox, Category)],
        now: Instant,
    ) -> Vec<TrackId> {
        let mut pairs: Vec<(f64, usize, TrackId)> = Vec::new();
        for (di, (bbox, category)) in detections.iter().enumerate() {
            for track in self.tracks.values() {
                if track.category != *category {
                    continue;
                }
                let iou = bbox.iou(&track.bbox);
                if iou >= self.config.iou_threshold {
                    pairs.push((iou, di, track.id));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
        let mut taken: Vec<TrackId> = Vec::new();
        for (_, di, track_id) in pairs {
            if assigned[di].is_some() || taken.contains(&track_id) {
                continue;
            }
            assigned[di] = Some(track_id);
            taken.push(track_id);
        }

        assigned
            .into_iter()
            .zip(detections)
            .map(|(slot, (bbox, category))| match slot {
                Some(track_id) => {
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.bbox = *bbox;
                        track.last_seen = now;
                    }
                    track_id
                }
                None => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1).max(1);
                    self.tracks.insert(id, Track::new(id, *category, *bbox, now));
                    id
                }
            })
            .collect()
    }

    /// Appends an outcome and applies the observing transitions.
    ///
    /// Returns the new state when the track changed state.
    pub fn record(
        &mut self,
        track_id: TrackId,
        outcome: MatchOutcome,
        now: Instant,
    ) -> Option<TrackState> {
        let n = self.config.buffer_size;
        let dwell = self.config.dwell;
        let track = self.tracks.get_mut(&track_id)?;

        track.outcomes.push_back(outcome);
        while track.outcomes.len() > n {
            track.outcomes.pop_front();
        }
        match outcome {
            MatchOutcome::Unknown { .. } => {
                track.unknown_since.get_or_insert(now);
            }
            MatchOutcome::Known { .. } => track.unknown_since = None,
        }

        if track.state != TrackState::Observing {
            return None;
        }

        if let Some(identity_id) = majority_identity(track, n) {
            track.state = TrackState::ConfirmedKnown(identity_id);
            return Some(track.state);
        }

        let all_unknown = track.outcomes.len() == n
            && track
                .outcomes
                .iter()
                .all(|o| matches!(o, MatchOutcome::Unknown { .. }));
        let dwelled = track
            .unknown_since
            .is_some_and(|since| now.saturating_duration_since(since) >= dwell);
        if all_unknown && dwelled && !track.registered_once {
            track.state = TrackState::PendingRegistration;
            return Some(track.state);
        }
        None
    }

    /// Keeps the sample if it beats the track's current best by detector
    /// confidence.
    pub fn offer_sample(&mut self, track_id: TrackId, sample: TrackSample) {
        if let Some(track) = self.tracks.get_mut(&track_id) {
            let better = track
                .best_sample
                .as_ref()
                .map_or(true, |best| sample.confidence > best.confidence);
            if better {
                track.best_sample = Some(sample);
            }
        }
    }

    /// Tracks waiting for registration, in id order.
    pub fn pending(&self) -> Vec<TrackId> {
        self.tracks
            .values()
            .filter(|t| t.state == TrackState::PendingRegistration)
            .map(|t| t.id)
            .collect()
    }

    /// `pending_registration` → `registered`. Returns `false` if the track
    /// is gone, not pending, or was already registered once.
    pub fn mark_registered(&mut self, track_id: TrackId, identity_id: IdentityId) -> bool {
        match self.tracks.get_mut(&track_id) {
            Some(track)
                if track.state == TrackState::PendingRegistration && !track.registered_once =>
            {
                track.state = TrackState::Registered(identity_id);
                track.registered_once = true;
                true
            }
            _ => false,
        }
    }

    /// `pending_registration` → `confirmed_known`, when registration found
    /// the subject was already known.
    pub fn confirm_known(&mut self, track_id: TrackId, identity_id: IdentityId) -> bool {
        match self.tracks.get_mut(&track_id) {
            Some(track) if track.state == TrackState::PendingRegistration => {
                track.state = TrackState::ConfirmedKnown(identity_id);
                true
            }
            _ => false,
        }
    }

    /// Sends a pending track back to observing with an empty history, so
    /// a failed registration is retried only after another full dwell.
    pub fn reset(&mut self, track_id: TrackId) {
        if let Some(track) = self.tracks.get_mut(&track_id) {
            if track.state == TrackState::PendingRegistration {
                track.state = TrackState::Observing;
                track.outcomes.clear();
                track.unknown_since = None;
            }
        }
    }

    /// Removes tracks not seen within the idle timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<Track> {
        let timeout = self.config.idle_timeout;
        let stale: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| now.saturating_duration_since(t.last_seen) > timeout)
            .map(|t| t.id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.tracks.remove(&id))
            .collect()
    }

    pub fn get(&self, track_id: TrackId) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// The identity holding a strict majority of the buffer's capacity.
fn majority_identity(track: &Track, buffer_size: usize) -> Option<IdentityId> {
    let mut counts: BTreeMap<IdentityId, usize> = BTreeMap::new();
    for id in track.outcomes.iter().filter_map(MatchOutcome::identity_id) {
        *counts.entry(id).or_default() += 1;
    }
    counts
        .into_iter()
        .find(|(_, count)| count * 2 > buffer_size)
        .map(|(id, _)| id)
}
