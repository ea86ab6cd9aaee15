use std::path::{Path, PathBuf};

use crate::shared::frame::Frame;
use crate::shared::BoxError;

/// Where representative photos of identities are kept.
pub trait PhotoStore: Send + Sync {
    /// Persists `crop` under a name derived from `name`; returns its location.
    fn save(&self, crop: &Frame, name: &str) -> Result<PathBuf, BoxError>;

    /// Best-effort removal of a photo that ended up unused.
    fn discard(&self, path: &Path);
}
