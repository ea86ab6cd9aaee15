use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;

use crate::capture::domain::camera_config::{CameraConfig, CameraRef, CameraSource};
use crate::capture::domain::capture_source::{CaptureFactory, CaptureSource};
use crate::config::{AppConfig, DetectionSettings};
use crate::detection::domain::detector::{Detection, Detector};
use crate::embedding::domain::embedder::Embedder;
use crate::embedding::domain::embedding::EmbeddingVector;
use crate::events::domain::identity_event::{EventKind, EventPublisher, IdentityEvent};
use crate::identity::domain::identity::IdentityId;
use crate::registration::domain::photo_store::PhotoStore;
use crate::shared::clock::unix_millis;
use crate::shared::frame::Frame;
use crate::tracking::domain::track::{MatchOutcome, TrackId, TrackSample, TrackState};
use crate::tracking::domain::track_buffer::{TrackBuffer, TrackBufferConfig};

use super::auto_registrar::{AutoRegistrar, RegistrationCandidate, RegistrationOutcome};
use super::camera_stats::CameraStats;
use super::inference_pool::InferencePool;
use super::pipeline_logger::{PipelineLogger, Stage};
use super::sighting_log::SightingLog;

/// How often a worker waiting for an inference permit checks for stop.
const PERMIT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Streaming => "streaming",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tunables for one camera, with its overrides applied.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub detection: DetectionSettings,
    pub similarity_threshold: f64,
    pub tracking: TrackBufferConfig,
    pub frame_stride: u32,
    /// Minimum spacing between processed frames; zero disables pacing.
    pub frame_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl PipelineSettings {
    pub fn for_camera(config: &AppConfig, camera: &CameraConfig) -> Self {
        let overrides = &camera.overrides;
        let mut detection = config.detection.clone();
        if let Some(confidence) = overrides.detection_confidence {
            detection.confidence = confidence;
        }
        Self {
            detection,
            similarity_threshold: overrides
                .similarity_threshold
                .unwrap_or(config.matching.similarity_threshold),
            tracking: config.tracking.to_buffer_config(),
            frame_stride: overrides
                .frame_stride
                .unwrap_or(config.worker.frame_stride)
                .max(1),
            frame_interval: Duration::from_millis(config.worker.frame_interval_ms),
            reconnect_backoff: Duration::from_millis(config.worker.reconnect_backoff_ms),
        }
    }
}

/// Collaborators shared by every camera worker.
pub struct WorkerContext {
    pub capture: Arc<dyn CaptureFactory>,
    pub detector: Arc<dyn Detector>,
    pub embedder: Arc<dyn Embedder>,
    pub registrar: Arc<AutoRegistrar>,
    pub photos: Arc<dyn PhotoStore>,
    pub events: Arc<dyn EventPublisher>,
    pub sightings: Arc<SightingLog>,
    pub pool: InferencePool,
}

#[derive(Clone, Debug)]
struct WorkerStatus {
    state: WorkerState,
    stats: CameraStats,
}

/// Handle to one camera's capture loop running on its own thread.
pub struct CameraWorker {
    camera: CameraRef,
    status: Arc<Mutex<WorkerStatus>>,
    stop_tx: Option<Sender<()>>,
    /// Disconnects when the worker thread exits.
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl CameraWorker {
    pub fn spawn(
        camera: CameraRef,
        source: CameraSource,
        settings: PipelineSettings,
        context: Arc<WorkerContext>,
        logger: Box<dyn PipelineLogger>,
    ) -> std::io::Result<Self> {
        let status = Arc::new(Mutex::new(WorkerStatus {
            state: WorkerState::Connecting,
            stats: CameraStats::default(),
        }));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let worker_loop = WorkerLoop {
            tracks: TrackBuffer::new(settings.tracking.clone()),
            camera: camera.clone(),
            source,
            settings,
            context,
            logger,
            status: Arc::clone(&status),
            stop_rx,
            frames_seen: 0,
            last_processed: None,
        };
        let handle = thread::Builder::new()
            .name(format!("camera-{}", camera.id))
            .spawn(move || {
                let _done = done_tx;
                worker_loop.run();
            })?;

        Ok(Self {
            camera,
            status,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn camera(&self) -> &CameraRef {
        &self.camera
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.status).state
    }

    pub fn stats(&self) -> CameraStats {
        lock(&self.status).stats.clone()
    }

    /// Signals the loop to stop without waiting for it.
    pub fn request_stop(&mut self) {
        self.stop_tx.take();
    }

    /// Signals the loop to stop and waits up to `grace` for it to exit.
    ///
    /// A frame already in flight finishes; no new frame is pulled. Returns
    /// `false` if the thread was still busy (e.g. blocked in a capture
    /// read) when the grace period ran out; it is then left to exit on its
    /// own. State and stats stay readable afterwards.
    pub fn stop(&mut self, grace: Duration) -> bool {
        self.request_stop();
        match self.done_rx.recv_timeout(grace) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        log::error!("[{}] Camera worker panicked", self.camera.name);
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[{}] Camera worker did not stop within {grace:?}, detaching",
                    self.camera.name
                );
                false
            }
        }
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        self.request_stop();
    }
}

struct WorkerLoop {
    camera: CameraRef,
    source: CameraSource,
    settings: PipelineSettings,
    context: Arc<WorkerContext>,
    logger: Box<dyn PipelineLogger>,
    status: Arc<Mutex<WorkerStatus>>,
    stop_rx: Receiver<()>,
    tracks: TrackBuffer,
    frames_seen: u64,
    last_processed: Option<Instant>,
}

/// One detection that survived cropping and embedding.
struct Observation {
    detection: Detection,
    crop: Frame,
    embedding: EmbeddingVector,
}

impl WorkerLoop {
    fn run(mut self) {
        self.logger
            .info(&format!("Starting camera worker for {}", self.source));
        loop {
            if self.stop_requested() {
                break;
            }
            self.set_state(WorkerState::Connecting);
            match self.context.capture.open(&self.source) {
                Ok(capture) => {
                    self.set_state(WorkerState::Streaming);
                    self.logger.info("Streaming");
                    if !self.stream(capture) {
                        break;
                    }
                }
                Err(e) => log::warn!("[{}] Could not open {}: {e}", self.camera.name, self.source),
            }

            self.set_state(WorkerState::Reconnecting);
            self.update_stats(|s| s.reconnects += 1);
            self.tracks.clear();
            if self.wait_or_stop(self.settings.reconnect_backoff) {
                break;
            }
        }

        self.set_state(WorkerState::Stopped);
        let stats = lock(&self.status).stats.clone();
        self.logger.summary(&stats);
        log::info!("[{}] Camera worker stopped", self.camera.name);
    }

    /// Pulls frames until the stream fails or a stop is requested.
    /// Returns `false` on stop.
    fn stream(&mut self, mut capture: Box<dyn CaptureSource>) -> bool {
        loop {
            if self.stop_requested() {
                return false;
            }
            let started = Instant::now();
            let frame = match capture.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::warn!("[{}] Stream ended, reconnecting", self.camera.name);
                    return true;
                }
                Err(e) => {
                    log::warn!("[{}] Read failed, reconnecting: {e}", self.camera.name);
                    return true;
                }
            };
            self.logger.timing(Stage::Capture, elapsed_ms(started));
            self.frames_seen += 1;
            self.update_stats(|s| {
                s.frames_read += 1;
                s.last_frame_ms = Some(unix_millis());
            });

            if self.should_skip() {
                self.update_stats(|s| s.frames_skipped += 1);
                continue;
            }
            self.last_processed = Some(Instant::now());
            if !self.process_frame(frame.with_camera(self.camera.id)) {
                return false;
            }
            thread::yield_now();
        }
    }

    fn should_skip(&self) -> bool {
        let stride = u64::from(self.settings.frame_stride.max(1));
        if (self.frames_seen - 1) % stride != 0 {
            return true;
        }
        let interval = self.settings.frame_interval;
        !interval.is_zero()
            && self
                .last_processed
                .is_some_and(|last| last.elapsed() < interval)
    }

    /// Runs detect → crop → embed → match → track → register on one frame.
    /// Returns `false` if a stop arrived while waiting for a permit.
    fn process_frame(&mut self, frame: Frame) -> bool {
        let Some(observations) = self.observe(&frame) else {
            return false;
        };
        let now = Instant::now();
        self.update_stats(|s| {
            s.frames_processed += 1;
            s.detections += observations.len() as u64;
        });

        let boxes: Vec<_> = observations
            .iter()
            .map(|o| (o.detection.bbox, o.detection.category))
            .collect();
        let track_ids = self.tracks.associate(&boxes, now);

        let started = Instant::now();
        let snapshot = self.context.registrar.store().snapshot();
        let mut confirmed = Vec::new();
        for (observation, track_id) in observations.into_iter().zip(track_ids) {
            let best = snapshot.best_match(&observation.embedding, Some(observation.detection.category));
            let outcome = match best {
                Some(m) if m.meets(self.settings.similarity_threshold) => MatchOutcome::Known {
                    identity_id: m.identity_id,
                    similarity: m.similarity,
                },
                other => MatchOutcome::Unknown {
                    best_similarity: other.map(|m| m.similarity),
                },
            };
            let transition = self.tracks.record(track_id, outcome, now);
            self.tracks.offer_sample(
                track_id,
                TrackSample {
                    crop: observation.crop.clone(),
                    embedding: observation.embedding,
                    confidence: observation.detection.confidence,
                },
            );
            if let Some(TrackState::ConfirmedKnown(identity_id)) = transition {
                confirmed.push((track_id, identity_id, observation.crop));
            }
        }
        self.logger.timing(Stage::Match, elapsed_ms(started));

        for (track_id, identity_id, crop) in confirmed {
            let similarity = self.tracks.get(track_id).and_then(|t| t.last_similarity());
            self.on_recognized(identity_id, track_id, similarity, &crop);
        }
        self.register_pending();
        self.tracks.expire(now);
        true
    }

    /// Detects and embeds under an inference permit. `None` on stop.
    fn observe(&mut self, frame: &Frame) -> Option<Vec<Observation>> {
        let _permit = loop {
            if let Some(permit) = self.context.pool.acquire_timeout(PERMIT_POLL) {
                break permit;
            }
            if self.stop_requested() {
                return None;
            }
        };

        let started = Instant::now();
        let detections = match self
            .context
            .detector
            .detect(frame, self.settings.detection.confidence)
        {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("[{}] Detection failed, skipping frame: {e}", self.camera.name);
                self.update_stats(|s| s.detector_failures += 1);
                Vec::new()
            }
        };
        self.logger.timing(Stage::Detect, elapsed_ms(started));

        let padding = self.settings.detection.crop_padding;
        let min_side = self.settings.detection.min_crop_side;
        let mut observations = Vec::with_capacity(detections.len());
        for detection in detections {
            let rect = detection
                .bbox
                .padded_crop(padding, frame.width(), frame.height())
                .filter(|r| r.min_side() >= min_side);
            let Some(rect) = rect else {
                self.update_stats(|s| s.crops_too_small += 1);
                continue;
            };
            let crop = frame.crop(&rect);

            let started = Instant::now();
            let embedded = self.context.embedder.embed(&crop);
            self.logger.timing(Stage::Embed, elapsed_ms(started));
            match embedded {
                Ok(embedding) => observations.push(Observation {
                    detection,
                    crop,
                    embedding,
                }),
                Err(e) => {
                    log::debug!("[{}] Embedding failed, dropping detection: {e}", self.camera.name);
                    self.update_stats(|s| s.embedder_failures += 1);
                }
            }
        }
        Some(observations)
    }

    fn register_pending(&mut self) {
        for track_id in self.tracks.pending() {
            let Some((category, sample)) = self
                .tracks
                .get(track_id)
                .map(|t| (t.category(), t.best_sample().cloned()))
            else {
                continue;
            };
            let Some(sample) = sample else {
                self.tracks.reset(track_id);
                continue;
            };
            let candidate = RegistrationCandidate {
                crop: sample.crop,
                embedding: sample.embedding,
                category,
                camera: Some(self.camera.clone()),
                track_id: Some(track_id),
            };

            let started = Instant::now();
            let outcome = self.context.registrar.confirm(&candidate, None);
            self.logger.timing(Stage::Register, elapsed_ms(started));
            match outcome {
                Ok(RegistrationOutcome::Registered(identity)) => {
                    self.tracks.mark_registered(track_id, identity.id);
                    self.context.sightings.record(identity.id, identity.created_at_ms);
                    self.update_stats(|s| s.registrations += 1);
                    self.logger.info(&format!(
                        "Registered {} {} ({}) from track {track_id}",
                        identity.category, identity.id, identity.name
                    ));
                }
                Ok(RegistrationOutcome::Matched(existing)) => {
                    self.tracks.confirm_known(track_id, existing.identity_id);
                    self.on_recognized(
                        existing.identity_id,
                        track_id,
                        Some(existing.similarity),
                        &candidate.crop,
                    );
                }
                Err(e) => {
                    log::warn!(
                        "[{}] Registration of track {track_id} failed, will retry: {e}",
                        self.camera.name
                    );
                    self.update_stats(|s| s.registration_failures += 1);
                    self.tracks.reset(track_id);
                }
            }
        }
    }

    /// A track settled on a known identity: fill in a missing photo and
    /// announce the first sighting of the day.
    fn on_recognized(
        &mut self,
        identity_id: IdentityId,
        track_id: TrackId,
        similarity: Option<f64>,
        crop: &Frame,
    ) {
        let store = self.context.registrar.store();
        let Some(mut identity) = store.snapshot().get(identity_id).cloned() else {
            return;
        };
        self.update_stats(|s| s.recognitions += 1);

        if identity.photo_path.is_none() {
            match self.context.photos.save(crop, &identity.name) {
                Ok(path) => match store.set_photo(identity_id, path.clone()) {
                    Ok(updated) => identity = updated,
                    Err(e) => {
                        log::warn!("[{}] Could not attach photo: {e}", self.camera.name);
                        self.context.photos.discard(&path);
                    }
                },
                Err(e) => log::warn!("[{}] Could not save photo: {e}", self.camera.name),
            }
        }

        let now = unix_millis();
        if self.context.sightings.record(identity_id, now) {
            self.context.events.publish(IdentityEvent::for_identity(
                EventKind::Recognized,
                &identity,
                Some(&self.camera),
                Some(track_id),
                similarity,
                now,
            ));
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns `true` on
    /// stop.
    fn wait_or_stop(&self, duration: Duration) -> bool {
        !matches!(
            self.stop_rx.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn set_state(&self, state: WorkerState) {
        let mut status = lock(&self.status);
        if status.state != state {
            log::debug!("[{}] {} -> {state}", self.camera.name, status.state);
            status.state = state;
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut CameraStats)) {
        update(&mut lock(&self.status).stats);
    }
}

fn lock(status: &Mutex<WorkerStatus>) -> MutexGuard<'_, WorkerStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::identity::domain::identity::Identity;
    use crate::identity::domain::identity_store::IdentityStore;
    use crate::identity::infrastructure::in_memory_repository::InMemoryRepository;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::registration::domain::description::{Description, DescriptionService};
    use crate::shared::category::Category;
    use crate::test_support::{
        detection, embedding_at, wait_until, FixedDescriber, FixedDetector, FnEmbedder,
        MemoryPhotoStore, RecordingPublisher, SyntheticCaptureFactory,
    };

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        store: Arc<IdentityStore>,
        events: Arc<RecordingPublisher>,
        photos: Arc<MemoryPhotoStore>,
        capture: Arc<SyntheticCaptureFactory>,
        context: Arc<WorkerContext>,
    }

    fn harness(
        existing: Vec<Identity>,
        detector: FixedDetector,
        embedder: FnEmbedder,
        capture: SyntheticCaptureFactory,
    ) -> Harness {
        harness_with_describer(existing, detector, embedder, capture, None)
    }

    fn harness_with_describer(
        existing: Vec<Identity>,
        detector: FixedDetector,
        embedder: FnEmbedder,
        capture: SyntheticCaptureFactory,
        describer: Option<Arc<dyn DescriptionService>>,
    ) -> Harness {
        let store = Arc::new(
            IdentityStore::open(Box::new(InMemoryRepository::with_identities(existing))).unwrap(),
        );
        let events = Arc::new(RecordingPublisher::default());
        let photos = Arc::new(MemoryPhotoStore::default());
        let capture = Arc::new(capture);
        let registrar = AutoRegistrar::new(Arc::clone(&store), photos.clone(), events.clone(), 0.60);
        let registrar = Arc::new(match describer {
            Some(describer) => registrar.with_descriptions(describer),
            None => registrar,
        });
        let context = Arc::new(WorkerContext {
            capture: capture.clone(),
            detector: Arc::new(detector),
            embedder: Arc::new(embedder),
            registrar,
            photos: photos.clone(),
            events: events.clone(),
            sightings: Arc::new(SightingLog::new()),
            pool: InferencePool::new(2),
        });
        Harness {
            store,
            events,
            photos,
            capture,
            context,
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            detection: DetectionSettings::default(),
            similarity_threshold: 0.75,
            tracking: TrackBufferConfig {
                buffer_size: 3,
                dwell: Duration::from_millis(20),
                idle_timeout: Duration::from_secs(2),
                iou_threshold: 0.3,
            },
            frame_stride: 1,
            frame_interval: Duration::ZERO,
            reconnect_backoff: Duration::from_millis(10),
        }
    }

    fn spawn(h: &Harness, settings: PipelineSettings) -> CameraWorker {
        CameraWorker::spawn(
            CameraRef {
                id: 1,
                name: "Curral".into(),
            },
            CameraSource::LocalDevice(0),
            settings,
            Arc::clone(&h.context),
            Box::new(NullPipelineLogger),
        )
        .unwrap()
    }

    fn cow_detector() -> FixedDetector {
        FixedDetector::new(vec![detection(10.0, 8.0, 50.0, 40.0, Category::Animal)])
    }

    fn count(events: &[IdentityEvent], kind: EventKind) -> usize {
        events.iter().filter(|e| e.event == kind).count()
    }

    #[test]
    fn test_stable_unknown_subject_is_registered_once() {
        let h = harness(
            vec![],
            cow_detector(),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory::default(),
        );
        let mut worker = spawn(&h, settings());

        assert!(wait_until(WAIT, || h.store.len() == 1));
        // Keep streaming well past the registration.
        let frames = h.capture.counters.frames();
        assert!(wait_until(WAIT, || h.capture.counters.frames() >= frames + 20));
        assert!(worker.stop(WAIT));

        assert_eq!(h.store.len(), 1);
        let events = h.events.events();
        assert_eq!(count(&events, EventKind::AutoRegistered), 1);
        assert_eq!(count(&events, EventKind::Recognized), 0);
        assert_eq!(events[0].camera_name.as_deref(), Some("Curral"));
        assert!(events[0].track_id.is_some());
    }

    #[test]
    fn test_frames_keep_flowing_while_description_is_pending() {
        let describer = Arc::new(
            FixedDescriber::ok(Description {
                text: "Brown Gir cow".into(),
                ..Description::default()
            })
            .with_delay(Duration::from_secs(1)),
        );
        let h = harness_with_describer(
            vec![],
            cow_detector(),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory::default(),
            Some(describer.clone()),
        );
        let mut worker = spawn(&h, settings());

        assert!(wait_until(WAIT, || h.store.len() == 1));
        let frames = h.capture.counters.frames();
        assert!(wait_until(Duration::from_millis(800), || {
            h.capture.counters.frames() >= frames + 20
        }));
        assert_eq!(count(&h.events.events(), EventKind::AutoRegistered), 1);
        assert!(worker.stop(WAIT));

        h.context.registrar.wait_for_descriptions();
        assert_eq!(describer.calls(), 1);
        let identity = h.store.snapshot().iter().next().cloned().unwrap();
        assert_eq!(identity.description.as_deref(), Some("Brown Gir cow"));
        assert_eq!(identity.breed.as_deref(), Some("Gir"));
    }

    #[test]
    fn test_known_subject_is_recognized_once_and_gets_photo() {
        let known = Identity::new(IdentityId(1), "Mimosa", Category::Animal, embedding_at(0.0), 0);
        let h = harness(
            vec![known],
            cow_detector(),
            FnEmbedder::fixed(embedding_at(3.0)),
            SyntheticCaptureFactory::default(),
        );
        let mut worker = spawn(&h, settings());

        assert!(wait_until(WAIT, || !h.events.events().is_empty()));
        let frames = h.capture.counters.frames();
        assert!(wait_until(WAIT, || h.capture.counters.frames() >= frames + 10));
        let stats = worker.stats();
        assert!(worker.stop(WAIT));

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventKind::Recognized);
        assert_eq!(events[0].entity_id, IdentityId(1));
        assert!(events[0].similarity.unwrap() > 0.99);
        assert_eq!(h.store.len(), 1);
        assert_eq!(stats.registrations, 0);
        assert_eq!(h.photos.saved().len(), 1);
        assert!(h.store.snapshot().get(IdentityId(1)).unwrap().photo_path.is_some());
    }

    #[test]
    fn test_detector_failure_skips_frames_without_stopping() {
        let h = harness(
            vec![],
            FixedDetector::failing(),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory::default(),
        );
        let mut worker = spawn(&h, settings());

        assert!(wait_until(WAIT, || worker.stats().detector_failures >= 5));
        assert_eq!(worker.state(), WorkerState::Streaming);
        assert!(worker.stop(WAIT));
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_embedder_failure_drops_detection() {
        let h = harness(
            vec![],
            cow_detector(),
            FnEmbedder::new(|_| Err("bad crop".into())),
            SyntheticCaptureFactory::default(),
        );
        let mut worker = spawn(&h, settings());

        assert!(wait_until(WAIT, || worker.stats().embedder_failures >= 5));
        assert!(worker.stop(WAIT));
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_tiny_detections_are_ignored() {
        let h = harness(
            vec![],
            FixedDetector::new(vec![detection(30.0, 20.0, 33.0, 23.0, Category::Animal)]),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory::default(),
        );
        let mut s = settings();
        s.detection.crop_padding = 0;
        let mut worker = spawn(&h, s);

        assert!(wait_until(WAIT, || worker.stats().crops_too_small >= 5));
        let stats = worker.stats();
        assert!(worker.stop(WAIT));
        assert_eq!(stats.detections, 0);
    }

    #[test]
    fn test_ended_stream_reconnects() {
        let h = harness(
            vec![],
            FixedDetector::new(vec![]),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory {
                frames_per_session: Some(3),
                failing_opens: 1,
                ..SyntheticCaptureFactory::default()
            },
        );
        let mut worker = spawn(&h, settings());

        assert!(wait_until(WAIT, || h.capture.counters.opens() >= 4));
        let stats = worker.stats();
        assert!(worker.stop(WAIT));
        assert!(stats.reconnects >= 3);
        assert!(stats.frames_read >= 6);
    }

    #[test]
    fn test_frame_stride_skips_frames() {
        let h = harness(
            vec![],
            FixedDetector::new(vec![]),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory::default(),
        );
        let mut s = settings();
        s.frame_stride = 3;
        let mut worker = spawn(&h, s);

        assert!(wait_until(WAIT, || worker.stats().frames_read >= 12));
        assert!(worker.stop(WAIT));
        let stats = worker.stats();
        assert_eq!(stats.frames_read, stats.frames_skipped + stats.frames_processed);
        assert_eq!(stats.frames_processed, stats.frames_read.div_ceil(3));
    }

    #[test]
    fn test_stop_halts_frame_pulls_within_grace() {
        let h = harness(
            vec![],
            cow_detector(),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory::default(),
        );
        let mut worker = spawn(&h, settings());
        assert!(wait_until(WAIT, || h.capture.counters.frames() >= 5));

        let started = Instant::now();
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_secs(1));

        let after_stop = h.capture.counters.frames();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(h.capture.counters.frames(), after_stop);
    }

    #[test]
    fn test_stop_during_backoff_is_prompt() {
        let h = harness(
            vec![],
            cow_detector(),
            FnEmbedder::fixed(embedding_at(0.0)),
            SyntheticCaptureFactory {
                failing_opens: usize::MAX,
                ..SyntheticCaptureFactory::default()
            },
        );
        let mut s = settings();
        s.reconnect_backoff = Duration::from_secs(30);
        let mut worker = spawn(&h, s);
        assert!(wait_until(WAIT, || worker.state() == WorkerState::Reconnecting));

        let started = Instant::now();
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_settings_apply_camera_overrides() {
        let mut config = AppConfig::default();
        config.worker.frame_stride = 2;
        let mut camera = CameraConfig::new(3, "Pasto", "0");
        camera.overrides.similarity_threshold = Some(0.9);
        camera.overrides.detection_confidence = Some(0.6);

        let s = PipelineSettings::for_camera(&config, &camera);
        assert_relative_eq!(s.similarity_threshold, 0.9);
        assert_relative_eq!(s.detection.confidence, 0.6);
        assert_eq!(s.frame_stride, 2);
        assert_eq!(s.tracking.buffer_size, 5);
    }
}
