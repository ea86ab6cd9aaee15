//! Fakes shared by the pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::capture::domain::camera_config::CameraSource;
use crate::capture::domain::capture_source::{CaptureFactory, CaptureSource};
use crate::detection::domain::detector::{Detection, Detector};
use crate::embedding::domain::embedder::Embedder;
use crate::embedding::domain::embedding::EmbeddingVector;
use crate::events::domain::identity_event::{EventPublisher, IdentityEvent};
use crate::registration::domain::description::{Description, DescriptionService};
use crate::registration::domain::photo_store::PhotoStore;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::category::Category;
use crate::shared::frame::Frame;
use crate::shared::BoxError;

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Unit vector in the plane at `degrees` from the x axis, padded to 4 dims.
pub fn embedding_at(degrees: f64) -> EmbeddingVector {
    let r = degrees.to_radians();
    EmbeddingVector::from_raw(vec![r.cos() as f32, r.sin() as f32, 0.0, 0.0])
        .expect("non-zero vector")
}

pub fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
    Frame::new(
        vec![value; (width * height * 3) as usize],
        width,
        height,
        3,
        0,
    )
}

pub fn detection(x1: f64, y1: f64, x2: f64, y2: f64, category: Category) -> Detection {
    Detection {
        bbox: BoundingBox { x1, y1, x2, y2 },
        confidence: 0.9,
        class_id: match category {
            Category::Person => 0,
            Category::Animal => 19,
        },
        category,
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<IdentityEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<IdentityEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: IdentityEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Records saves and discards without touching disk.
#[derive(Default)]
pub struct MemoryPhotoStore {
    saved: Mutex<Vec<PathBuf>>,
    discarded: Mutex<Vec<PathBuf>>,
    counter: AtomicUsize,
}

impl MemoryPhotoStore {
    pub fn saved(&self) -> Vec<PathBuf> {
        self.saved.lock().unwrap().clone()
    }

    pub fn discarded(&self) -> Vec<PathBuf> {
        self.discarded.lock().unwrap().clone()
    }
}

impl PhotoStore for MemoryPhotoStore {
    fn save(&self, _crop: &Frame, name: &str) -> Result<PathBuf, BoxError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from(format!("photos/{name}_{n}.jpg"));
        self.saved.lock().unwrap().push(path.clone());
        Ok(path)
    }

    fn discard(&self, path: &Path) {
        self.discarded.lock().unwrap().push(path.to_path_buf());
    }
}

/// Answers every request with the same reply after an optional delay.
pub struct FixedDescriber {
    reply: Result<Description, String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FixedDescriber {
    pub fn ok(description: Description) -> Self {
        Self {
            reply: Ok(description),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DescriptionService for FixedDescriber {
    fn describe(&self, _crop: &Frame, _category: Category) -> Result<Description, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.reply.clone().map_err(BoxError::from)
    }
}

/// Returns the same detections for every frame, or fails every call.
pub struct FixedDetector {
    detections: Vec<Detection>,
    fail: bool,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            detections: Vec::new(),
            fail: true,
        }
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _frame: &Frame, min_confidence: f64) -> Result<Vec<Detection>, BoxError> {
        if self.fail {
            return Err("detector unavailable".into());
        }
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= min_confidence)
            .cloned()
            .collect())
    }
}

/// Maps a crop to an embedding through a closure, so tests can give each
/// camera or pixel value its own subject.
pub struct FnEmbedder {
    embed: Box<dyn Fn(&Frame) -> Result<EmbeddingVector, BoxError> + Send + Sync>,
    calls: AtomicUsize,
}

impl FnEmbedder {
    pub fn new(
        embed: impl Fn(&Frame) -> Result<EmbeddingVector, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            embed: Box::new(embed),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(embedding: EmbeddingVector) -> Self {
        Self::new(move |_| Ok(embedding.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FnEmbedder {
    fn embed(&self, crop: &Frame) -> Result<EmbeddingVector, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.embed)(crop)
    }
}

/// Counters shared between a [`SyntheticCaptureFactory`] and the test.
#[derive(Default)]
pub struct CaptureCounters {
    pub opens: AtomicUsize,
    pub frames: AtomicUsize,
}

impl CaptureCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

/// Produces solid frames whose pixel value is the local device index (or
/// 0 for URLs), paced at `frame_delay`.
pub struct SyntheticCaptureFactory {
    pub counters: Arc<CaptureCounters>,
    pub width: u32,
    pub height: u32,
    pub frame_delay: Duration,
    /// Each opened stream ends after this many frames.
    pub frames_per_session: Option<usize>,
    /// The first N opens fail.
    pub failing_opens: usize,
}

impl Default for SyntheticCaptureFactory {
    fn default() -> Self {
        Self {
            counters: Arc::new(CaptureCounters::default()),
            width: 64,
            height: 48,
            frame_delay: Duration::from_millis(5),
            frames_per_session: None,
            failing_opens: 0,
        }
    }
}

impl CaptureFactory for SyntheticCaptureFactory {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureSource>, BoxError> {
        let attempt = self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_opens {
            return Err(format!("cannot open {source}").into());
        }
        let value = match source {
            CameraSource::LocalDevice(index) => *index as u8,
            _ => 0,
        };
        Ok(Box::new(SyntheticCapture {
            counters: Arc::clone(&self.counters),
            width: self.width,
            height: self.height,
            value,
            delay: self.frame_delay,
            remaining: self.frames_per_session,
            index: 0,
        }))
    }
}

struct SyntheticCapture {
    counters: Arc<CaptureCounters>,
    width: u32,
    height: u32,
    value: u8,
    delay: Duration,
    remaining: Option<usize>,
    index: usize,
}

impl CaptureSource for SyntheticCapture {
    fn read(&mut self) -> Result<Option<Frame>, BoxError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        thread::sleep(self.delay);
        self.counters.frames.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(
            vec![self.value; (self.width * self.height * 3) as usize],
            self.width,
            self.height,
            3,
            self.index,
        );
        self.index += 1;
        Ok(Some(frame))
    }
}
