use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::capture::domain::camera_config::{CameraConfig, CameraConfigError, CameraId, CameraRef};
use crate::config::AppConfig;

use super::camera_stats::CameraStats;
use super::camera_worker::{CameraWorker, PipelineSettings, WorkerContext, WorkerState};
use super::pipeline_logger::{PipelineLogger, StdoutPipelineLogger};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("camera {0} already exists")]
    AlreadyExists(CameraId),
    #[error("camera {0} not found")]
    NotFound(CameraId),
    #[error("camera {id}: {source}")]
    InvalidCamera {
        id: CameraId,
        #[source]
        source: CameraConfigError,
    },
    #[error("failed to start camera {id}: {source}")]
    Spawn {
        id: CameraId,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CameraStatus {
    pub id: CameraId,
    pub name: String,
    pub active: bool,
    pub state: WorkerState,
    pub stats: CameraStats,
}

type LoggerFactory = Box<dyn Fn(&CameraRef) -> Box<dyn PipelineLogger> + Send + Sync>;

struct ManagedCamera {
    config: CameraConfig,
    worker: Option<CameraWorker>,
    /// Counters of the last stopped worker, kept for status queries.
    last_stats: CameraStats,
}

/// Owns every camera worker of the process.
///
/// Configuration errors surface from `add`/`update` before any thread is
/// started. Stopping a camera never blocks longer than the grace period.
pub struct CameraSupervisor {
    config: AppConfig,
    context: Arc<WorkerContext>,
    cameras: Mutex<BTreeMap<CameraId, ManagedCamera>>,
    stop_grace: Duration,
    logger_factory: LoggerFactory,
}

impl CameraSupervisor {
    /// `config` supplies the global tunables; its camera list is ignored.
    pub fn new(config: AppConfig, context: Arc<WorkerContext>) -> Self {
        let stop_grace = Duration::from_millis(config.worker.stop_grace_ms);
        Self {
            config,
            context,
            cameras: Mutex::new(BTreeMap::new()),
            stop_grace,
            logger_factory: Box::new(|camera| Box::new(StdoutPipelineLogger::new(&camera.name))),
        }
    }

    pub fn with_logger_factory(
        mut self,
        factory: impl Fn(&CameraRef) -> Box<dyn PipelineLogger> + Send + Sync + 'static,
    ) -> Self {
        self.logger_factory = Box::new(factory);
        self
    }

    /// Registers a camera and starts it if active.
    pub fn add(&self, camera: CameraConfig) -> Result<(), SupervisorError> {
        validate(&camera, self.config.matching.dedup_threshold)?;
        let mut cameras = self.lock();
        if cameras.contains_key(&camera.id) {
            return Err(SupervisorError::AlreadyExists(camera.id));
        }
        let worker = self.start(&camera)?;
        log::info!("Added camera {} ({})", camera.id, camera.name);
        cameras.insert(
            camera.id,
            ManagedCamera {
                config: camera,
                worker,
                last_stats: CameraStats::default(),
            },
        );
        Ok(())
    }

    /// Replaces a camera's configuration, restarting or stopping its worker.
    pub fn update(&self, camera: CameraConfig) -> Result<(), SupervisorError> {
        validate(&camera, self.config.matching.dedup_threshold)?;
        let previous = {
            let mut cameras = self.lock();
            let managed = cameras
                .get_mut(&camera.id)
                .ok_or(SupervisorError::NotFound(camera.id))?;
            managed.worker.take()
        };
        let last_stats = previous.map(|worker| self.shut_down(worker));

        let worker = self.start(&camera)?;
        let mut cameras = self.lock();
        let managed = cameras
            .get_mut(&camera.id)
            .ok_or(SupervisorError::NotFound(camera.id))?;
        if let Some(stats) = last_stats {
            managed.last_stats = stats;
        }
        log::info!(
            "Updated camera {} ({}), {}",
            camera.id,
            camera.name,
            if worker.is_some() { "running" } else { "inactive" }
        );
        managed.config = camera;
        managed.worker = worker;
        Ok(())
    }

    /// Stops and forgets a camera. Returns its last configuration.
    pub fn remove(&self, id: CameraId) -> Result<CameraConfig, SupervisorError> {
        let managed = self
            .lock()
            .remove(&id)
            .ok_or(SupervisorError::NotFound(id))?;
        if let Some(worker) = managed.worker {
            self.shut_down(worker);
        }
        log::info!("Removed camera {id} ({})", managed.config.name);
        Ok(managed.config)
    }

    /// Stops every worker. Cameras stay registered as stopped.
    pub fn stop_all(&self) {
        let mut workers: Vec<(CameraId, CameraWorker)> = self
            .lock()
            .iter_mut()
            .filter_map(|(id, m)| m.worker.take().map(|w| (*id, w)))
            .collect();
        for (_, worker) in workers.iter_mut() {
            worker.request_stop();
        }
        let stopped: Vec<(CameraId, CameraStats)> = workers
            .into_iter()
            .map(|(id, worker)| (id, self.shut_down(worker)))
            .collect();

        let mut cameras = self.lock();
        for (id, stats) in stopped {
            if let Some(managed) = cameras.get_mut(&id) {
                managed.last_stats = stats;
            }
        }
    }

    pub fn statuses(&self) -> Vec<CameraStatus> {
        self.lock()
            .values()
            .map(|m| CameraStatus {
                id: m.config.id,
                name: m.config.name.clone(),
                active: m.config.active,
                state: m
                    .worker
                    .as_ref()
                    .map_or(WorkerState::Stopped, CameraWorker::state),
                stats: m
                    .worker
                    .as_ref()
                    .map_or_else(|| m.last_stats.clone(), CameraWorker::stats),
            })
            .collect()
    }

    pub fn stats(&self, id: CameraId) -> Option<CameraStats> {
        self.lock().get(&id).map(|m| {
            m.worker
                .as_ref()
                .map_or_else(|| m.last_stats.clone(), CameraWorker::stats)
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start(&self, camera: &CameraConfig) -> Result<Option<CameraWorker>, SupervisorError> {
        if !camera.active {
            return Ok(None);
        }
        let source = camera
            .camera_source()
            .map_err(|source| SupervisorError::InvalidCamera {
                id: camera.id,
                source,
            })?;
        let camera_ref = camera.camera_ref();
        let logger = (self.logger_factory)(&camera_ref);
        CameraWorker::spawn(
            camera_ref,
            source,
            PipelineSettings::for_camera(&self.config, camera),
            Arc::clone(&self.context),
            logger,
        )
        .map(Some)
        .map_err(|source| SupervisorError::Spawn {
            id: camera.id,
            source,
        })
    }

    fn shut_down(&self, mut worker: CameraWorker) -> CameraStats {
        worker.stop(self.stop_grace);
        worker.stats()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CameraId, ManagedCamera>> {
        self.cameras.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CameraSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn validate(camera: &CameraConfig, dedup_threshold: f64) -> Result<(), SupervisorError> {
    camera
        .validate(dedup_threshold)
        .map_err(|source| SupervisorError::InvalidCamera {
            id: camera.id,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::domain::camera_config::CameraKind;
    use crate::events::domain::identity_event::EventKind;
    use crate::identity::domain::identity_store::IdentityStore;
    use crate::identity::infrastructure::in_memory_repository::InMemoryRepository;
    use crate::pipeline::auto_registrar::AutoRegistrar;
    use crate::pipeline::inference_pool::InferencePool;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::pipeline::sighting_log::SightingLog;
    use crate::shared::category::Category;
    use crate::test_support::{
        detection, embedding_at, wait_until, FixedDetector, FnEmbedder, MemoryPhotoStore,
        RecordingPublisher, SyntheticCaptureFactory,
    };
    use std::thread;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        store: Arc<IdentityStore>,
        events: Arc<RecordingPublisher>,
        capture: Arc<SyntheticCaptureFactory>,
        supervisor: CameraSupervisor,
    }

    /// Every camera sees one cow; the embedding angle is ten degrees per
    /// device index, so all cameras see the same subject.
    fn harness() -> Harness {
        let store = Arc::new(IdentityStore::open(Box::new(InMemoryRepository::new())).unwrap());
        let events = Arc::new(RecordingPublisher::default());
        let photos = Arc::new(MemoryPhotoStore::default());
        let capture = Arc::new(SyntheticCaptureFactory::default());
        let registrar = Arc::new(AutoRegistrar::new(
            Arc::clone(&store),
            photos.clone(),
            events.clone(),
            0.60,
        ));
        let context = Arc::new(WorkerContext {
            capture: capture.clone(),
            detector: Arc::new(FixedDetector::new(vec![detection(
                10.0,
                8.0,
                50.0,
                40.0,
                Category::Animal,
            )])),
            embedder: Arc::new(FnEmbedder::new(|crop| {
                Ok(embedding_at(f64::from(crop.data()[0]) * 10.0))
            })),
            registrar,
            photos,
            events: events.clone(),
            sightings: Arc::new(SightingLog::new()),
            pool: InferencePool::new(2),
        });

        let mut config = AppConfig::default();
        config.tracking.buffer_size = 3;
        config.tracking.dwell_ms = 20;
        config.worker.reconnect_backoff_ms = 10;
        config.worker.stop_grace_ms = 1000;

        let supervisor = CameraSupervisor::new(config, context)
            .with_logger_factory(|_| Box::new(NullPipelineLogger));
        Harness {
            store,
            events,
            capture,
            supervisor,
        }
    }

    fn camera(id: CameraId, device: u32) -> CameraConfig {
        CameraConfig::new(id, format!("cam{id}"), device.to_string())
    }

    fn state_of(h: &Harness, id: CameraId) -> WorkerState {
        h.supervisor
            .statuses()
            .into_iter()
            .find(|s| s.id == id)
            .map(|s| s.state)
            .unwrap()
    }

    #[test]
    fn test_invalid_camera_fails_before_start() {
        let h = harness();
        let err = h.supervisor.add(CameraConfig::new(1, " ", "0")).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidCamera { id: 1, .. }));

        let err = h
            .supervisor
            .add(CameraConfig::new(2, "bad", "ftp://nowhere"))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidCamera { id: 2, .. }));

        assert!(h.supervisor.is_empty());
        assert_eq!(h.capture.counters.opens(), 0);
    }

    #[test]
    fn test_threshold_override_below_dedup_is_rejected() {
        let h = harness();
        let mut lenient = camera(1, 0);
        lenient.overrides.similarity_threshold = Some(0.5);
        assert!(matches!(
            h.supervisor.add(lenient.clone()),
            Err(SupervisorError::InvalidCamera { id: 1, .. })
        ));
        assert!(h.supervisor.is_empty());

        h.supervisor.add(camera(1, 0)).unwrap();
        assert!(matches!(
            h.supervisor.update(lenient),
            Err(SupervisorError::InvalidCamera { id: 1, .. })
        ));
        assert!(h.supervisor.statuses()[0].active);
        assert!(wait_until(WAIT, || state_of(&h, 1) == WorkerState::Streaming));
        assert_eq!(h.capture.counters.opens(), 1);
    }

    #[test]
    fn test_duplicate_camera_is_rejected() {
        let h = harness();
        h.supervisor.add(camera(1, 0)).unwrap();
        assert!(matches!(
            h.supervisor.add(camera(1, 1)),
            Err(SupervisorError::AlreadyExists(1))
        ));
        assert_eq!(h.supervisor.len(), 1);
    }

    #[test]
    fn test_inactive_camera_never_streams() {
        let h = harness();
        let mut config = camera(1, 0);
        config.active = false;
        h.supervisor.add(config).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(h.capture.counters.opens(), 0);
        assert_eq!(state_of(&h, 1), WorkerState::Stopped);
    }

    #[test]
    fn test_remove_stops_frame_pulls_within_grace() {
        let h = harness();
        h.supervisor.add(camera(1, 0)).unwrap();
        assert!(wait_until(WAIT, || h.capture.counters.frames() >= 5));

        let started = Instant::now();
        let removed = h.supervisor.remove(1).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(removed.name, "cam1");

        let after = h.capture.counters.frames();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(h.capture.counters.frames(), after);
        assert!(matches!(h.supervisor.remove(1), Err(SupervisorError::NotFound(1))));
    }

    #[test]
    fn test_update_deactivates_and_reactivates() {
        let h = harness();
        h.supervisor.add(camera(1, 0)).unwrap();
        assert!(wait_until(WAIT, || state_of(&h, 1) == WorkerState::Streaming));

        let mut inactive = camera(1, 0);
        inactive.active = false;
        h.supervisor.update(inactive).unwrap();
        assert_eq!(state_of(&h, 1), WorkerState::Stopped);
        let frames_read = h.supervisor.stats(1).unwrap().frames_read;
        assert!(frames_read > 0);

        h.supervisor.update(camera(1, 0)).unwrap();
        assert!(wait_until(WAIT, || state_of(&h, 1) == WorkerState::Streaming));
        assert!(h.capture.counters.opens() >= 2);
    }

    #[test]
    fn test_update_unknown_camera() {
        let h = harness();
        assert!(matches!(
            h.supervisor.update(camera(9, 0)),
            Err(SupervisorError::NotFound(9))
        ));
    }

    #[test]
    fn test_two_cameras_same_subject_register_one_identity() {
        let h = harness();
        h.supervisor.add(camera(1, 0)).unwrap();
        h.supervisor.add(camera(2, 1)).unwrap();

        let settled = wait_until(WAIT, || {
            let stats: Vec<_> = h.supervisor.statuses().into_iter().map(|s| s.stats).collect();
            let registrations: u64 = stats.iter().map(|s| s.registrations).sum();
            registrations == 1 && stats.iter().all(|s| s.registrations + s.recognitions >= 1)
        });
        assert!(settled);

        let frames = h.capture.counters.frames();
        assert!(wait_until(WAIT, || h.capture.counters.frames() >= frames + 20));
        h.supervisor.stop_all();

        assert_eq!(h.store.len(), 1);
        let registered = h
            .events
            .events()
            .iter()
            .filter(|e| e.event == EventKind::AutoRegistered)
            .count();
        assert_eq!(registered, 1);
    }

    #[test]
    fn test_stop_all_keeps_cameras_registered() {
        let h = harness();
        h.supervisor.add(camera(1, 0)).unwrap();
        h.supervisor.add(camera(2, 1)).unwrap();
        assert!(wait_until(WAIT, || h.capture.counters.frames() >= 10));

        h.supervisor.stop_all();

        let statuses = h.supervisor.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == WorkerState::Stopped));
        assert!(statuses.iter().any(|s| s.stats.frames_read > 0));
    }

    #[test]
    fn test_declared_kind_mismatch_is_rejected() {
        let h = harness();
        let mut config = CameraConfig::new(3, "gate", "http://gate.local/stream");
        config.kind = Some(CameraKind::Rtsp);
        assert!(matches!(
            h.supervisor.add(config),
            Err(SupervisorError::InvalidCamera { id: 3, .. })
        ));
    }
}
