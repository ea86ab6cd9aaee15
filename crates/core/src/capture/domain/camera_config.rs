use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CameraId = u32;

#[derive(Error, Debug, PartialEq)]
pub enum CameraConfigError {
    #[error("camera name must not be empty")]
    EmptyName,
    #[error("invalid source '{value}': {reason}")]
    InvalidSource { value: String, reason: String },
    #[error("invalid override: {0}")]
    InvalidOverride(String),
}

/// Where frames come from. Closed set; each variant maps to one way of
/// opening the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSource {
    /// Local capture device by index (`/dev/videoN`, AVFoundation index, ...).
    LocalDevice(u32),
    /// HTTP or MJPEG stream.
    Http(String),
    Rtsp(String),
}

impl CameraSource {
    /// Infers the source variant from a raw string: a bare integer is a
    /// device index, otherwise the URL scheme decides.
    pub fn infer(raw: &str) -> Result<Self, CameraConfigError> {
        let trimmed = raw.trim();
        if let Ok(index) = trimmed.parse::<u32>() {
            return Ok(CameraSource::LocalDevice(index));
        }
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            Ok(CameraSource::Rtsp(trimmed.to_string()))
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(CameraSource::Http(trimmed.to_string()))
        } else {
            Err(CameraConfigError::InvalidSource {
                value: raw.to_string(),
                reason: "expected a device index or an http(s):// or rtsp:// URL".into(),
            })
        }
    }

    /// Parses `raw` as the given kind, rejecting mismatches such as an RTSP
    /// URL on a camera declared as local.
    pub fn parse(kind: CameraKind, raw: &str) -> Result<Self, CameraConfigError> {
        let source = Self::infer(raw)?;
        let matches = matches!(
            (kind, &source),
            (CameraKind::Local, CameraSource::LocalDevice(_))
                | (CameraKind::Http, CameraSource::Http(_))
                | (CameraKind::Rtsp, CameraSource::Rtsp(_))
        );
        if matches {
            Ok(source)
        } else {
            Err(CameraConfigError::InvalidSource {
                value: raw.to_string(),
                reason: format!("not a valid {kind} source"),
            })
        }
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::LocalDevice(index) => write!(f, "device {index}"),
            CameraSource::Http(url) | CameraSource::Rtsp(url) => f.write_str(url),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    Local,
    Http,
    Rtsp,
}

impl fmt::Display for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraKind::Local => write!(f, "local"),
            CameraKind::Http => write!(f, "http"),
            CameraKind::Rtsp => write!(f, "rtsp"),
        }
    }
}

/// Per-camera tunables that take precedence over the global configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraOverrides {
    pub detection_confidence: Option<f64>,
    pub similarity_threshold: Option<f64>,
    pub frame_stride: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: CameraId,
    pub name: String,
    /// Declared kind. When absent the kind is inferred from `source`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CameraKind>,
    pub source: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub overrides: CameraOverrides,
}

fn default_active() -> bool {
    true
}

impl CameraConfig {
    pub fn new(id: CameraId, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: None,
            source: source.into(),
            active: true,
            overrides: CameraOverrides::default(),
        }
    }

    pub fn camera_source(&self) -> Result<CameraSource, CameraConfigError> {
        match self.kind {
            Some(kind) => CameraSource::parse(kind, &self.source),
            None => CameraSource::infer(&self.source),
        }
    }

    pub fn camera_ref(&self) -> CameraRef {
        CameraRef {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Checks the camera on its own and against the registrar's
    /// `dedup_threshold`: a camera may not accept matches that registration
    /// would still treat as new subjects.
    pub fn validate(&self, dedup_threshold: f64) -> Result<(), CameraConfigError> {
        if self.name.trim().is_empty() {
            return Err(CameraConfigError::EmptyName);
        }
        self.camera_source()?;

        let o = &self.overrides;
        if let Some(c) = o.detection_confidence {
            if !(c > 0.0 && c <= 1.0) {
                return Err(CameraConfigError::InvalidOverride(format!(
                    "detection_confidence {c} must be in (0, 1]"
                )));
            }
        }
        if let Some(t) = o.similarity_threshold {
            if !(dedup_threshold..=1.0).contains(&t) {
                return Err(CameraConfigError::InvalidOverride(format!(
                    "similarity_threshold {t} must be in [{dedup_threshold}, 1], \
                     not below the dedup threshold"
                )));
            }
        }
        if o.frame_stride == Some(0) {
            return Err(CameraConfigError::InvalidOverride(
                "frame_stride must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Camera identity carried on events and log lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraRef {
    pub id: CameraId,
    pub name: String,
}
