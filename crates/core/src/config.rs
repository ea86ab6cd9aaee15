use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::domain::camera_config::{CameraConfig, CameraConfigError, CameraId};
use crate::shared::constants::{
    DEFAULT_DEDUP_THRESHOLD, DEFAULT_DETECTION_CONFIDENCE, DEFAULT_SIMILARITY_THRESHOLD,
    DETECTOR_MODEL_NAME, EMBEDDER_MODEL_NAME,
};
use crate::tracking::domain::track_buffer::TrackBufferConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read or write config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("camera {id}: {source}")]
    Camera {
        id: CameraId,
        #[source]
        source: CameraConfigError,
    },
    #[error("camera id {0} is configured more than once")]
    DuplicateCamera(CameraId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Minimum similarity for a frame to count as a vote for an identity.
    pub similarity_threshold: f64,
    /// Similarity at or above which a registration candidate is treated
    /// as an identity that already exists.
    pub dedup_threshold: f64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub buffer_size: usize,
    pub dwell_ms: u64,
    pub idle_timeout_ms: u64,
    pub iou_threshold: f64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        let defaults = TrackBufferConfig::default();
        Self {
            buffer_size: defaults.buffer_size,
            dwell_ms: defaults.dwell.as_millis() as u64,
            idle_timeout_ms: defaults.idle_timeout.as_millis() as u64,
            iou_threshold: defaults.iou_threshold,
        }
    }
}

impl TrackingSettings {
    pub fn to_buffer_config(&self) -> TrackBufferConfig {
        TrackBufferConfig {
            buffer_size: self.buffer_size,
            dwell: Duration::from_millis(self.dwell_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            iou_threshold: self.iou_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub confidence: f64,
    pub nms_iou: f64,
    /// Pixels added around each box before cropping.
    pub crop_padding: u32,
    /// Crops with a shorter side are skipped for that frame.
    pub min_crop_side: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_DETECTION_CONFIDENCE,
            nms_iou: 0.45,
            crop_padding: 10,
            min_crop_side: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Process every Nth frame.
    pub frame_stride: u32,
    pub reconnect_backoff_ms: u64,
    /// How long `stop` waits for a worker before giving up on it.
    pub stop_grace_ms: u64,
    /// Minimum time between processed frames; 0 disables pacing.
    pub frame_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            frame_stride: 1,
            reconnect_backoff_ms: 3000,
            stop_grace_ms: 5000,
            frame_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Concurrent detect/embed calls allowed across all cameras.
    pub pool_size: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptionSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Environment variable holding the API key. The key itself is never
    /// written to the config file.
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for DescriptionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-6".to_string(),
            timeout_ms: 5000,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 350,
        }
    }
}

impl DescriptionSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub capacity: usize,
    pub max_consecutive_drops: u32,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: crate::events::infrastructure::event_bus::DEFAULT_CAPACITY,
            max_consecutive_drops:
                crate::events::infrastructure::event_bus::DEFAULT_MAX_CONSECUTIVE_DROPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    /// Relative paths are resolved against `data_dir`.
    pub identities_file: PathBuf,
    pub photos_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            identities_file: PathBuf::from("identities.json"),
            photos_dir: PathBuf::from("photos"),
        }
    }
}

impl StorageSettings {
    pub fn identities_path(&self) -> PathBuf {
        self.data_dir.join(&self.identities_file)
    }

    pub fn photos_path(&self) -> PathBuf {
        self.data_dir.join(&self.photos_dir)
    }
}

/// Where to find one ONNX model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLocation {
    /// File name used in the cache and bundled directories.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_dir: Option<PathBuf>,
}

impl ModelLocation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            url: None,
            bundled_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub detector: ModelLocation,
    pub embedder: ModelLocation,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            detector: ModelLocation::named(DETECTOR_MODEL_NAME),
            embedder: ModelLocation::named(EMBEDDER_MODEL_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub matching: MatchingSettings,
    pub tracking: TrackingSettings,
    pub detection: DetectionSettings,
    pub worker: WorkerSettings,
    pub inference: InferenceSettings,
    pub description: DescriptionSettings,
    pub events: EventSettings,
    pub storage: StorageSettings,
    pub models: ModelSettings,
    pub cameras: Vec<CameraConfig>,
}

impl AppConfig {
    /// `<config dir>/HerdWatch/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("HerdWatch").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns validated defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matching;
        check_unit("matching.similarity_threshold", m.similarity_threshold)?;
        check_unit("matching.dedup_threshold", m.dedup_threshold)?;
        if m.dedup_threshold > m.similarity_threshold {
            return Err(ConfigError::Invalid(format!(
                "matching.dedup_threshold ({}) must not exceed matching.similarity_threshold ({})",
                m.dedup_threshold, m.similarity_threshold
            )));
        }

        let t = &self.tracking;
        if t.buffer_size == 0 {
            return Err(ConfigError::Invalid("tracking.buffer_size must be at least 1".into()));
        }
        if t.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "tracking.idle_timeout_ms must be positive".into(),
            ));
        }
        check_unit("tracking.iou_threshold", t.iou_threshold)?;

        check_unit("detection.confidence", self.detection.confidence)?;
        check_unit("detection.nms_iou", self.detection.nms_iou)?;

        if self.worker.frame_stride == 0 {
            return Err(ConfigError::Invalid("worker.frame_stride must be at least 1".into()));
        }
        if self.inference.pool_size == 0 {
            return Err(ConfigError::Invalid("inference.pool_size must be at least 1".into()));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid("events.capacity must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.id) {
                return Err(ConfigError::DuplicateCamera(camera.id));
            }
            camera
                .validate(m.dedup_threshold)
                .map_err(|source| ConfigError::Camera {
                    id: camera.id,
                    source,
                })?;
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be between 0 and 1, got {value}"
        )))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("HerdWatch"))
        .unwrap_or_else(|| PathBuf::from("herdwatch-data"))
}
