use crate::shared::frame::Frame;
use crate::shared::BoxError;

use super::embedding::EmbeddingVector;

/// Turns a cropped subject image into an appearance vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, crop: &Frame) -> Result<EmbeddingVector, BoxError>;
}
