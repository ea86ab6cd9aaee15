use crate::shared::bounding_box::BoundingBox;
use crate::shared::category::Category;
use crate::shared::frame::Frame;
use crate::shared::BoxError;

/// One located subject within a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    /// Raw detector class id (COCO numbering).
    pub class_id: usize,
    pub category: Category,
}

/// Locates people and animals in a frame.
///
/// Implementations return detections of the target classes only, at or
/// above `min_confidence`, ordered by descending confidence. Shared by
/// every camera worker, so `detect` takes `&self`.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame, min_confidence: f64) -> Result<Vec<Detection>, BoxError>;
}
