use crate::shared::frame::Frame;
use crate::shared::BoxError;

use super::camera_config::CameraSource;

/// An open, live frame stream from one camera.
///
/// Dropping the source releases the underlying device or connection.
pub trait CaptureSource: Send {
    /// Pulls the next frame. `Ok(None)` means the stream ended; callers
    /// treat that the same as a read failure and reconnect.
    fn read(&mut self) -> Result<Option<Frame>, BoxError>;
}

/// Opens capture sources. Shared by every camera worker, so it must be
/// callable from many threads.
pub trait CaptureFactory: Send + Sync {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureSource>, BoxError>;
}
