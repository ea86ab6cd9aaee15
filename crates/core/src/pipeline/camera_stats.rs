use serde::Serialize;

/// Running counters for one camera worker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    /// Frames skipped by the stride setting.
    pub frames_skipped: u64,
    pub detections: u64,
    pub detector_failures: u64,
    pub embedder_failures: u64,
    pub crops_too_small: u64,
    pub recognitions: u64,
    pub registrations: u64,
    pub registration_failures: u64,
    pub reconnects: u64,
    pub last_frame_ms: Option<u64>,
}

impl CameraStats {
    /// One-line form used in log output.
    pub fn brief(&self) -> String {
        format!(
            "{} frames ({} skipped), {} detections, {} recognized, {} registered, {} reconnects, {} detector / {} embedder failures",
            self.frames_read,
            self.frames_skipped,
            self.detections,
            self.recognitions,
            self.registrations,
            self.reconnects,
            self.detector_failures,
            self.embedder_failures,
        )
    }
}
