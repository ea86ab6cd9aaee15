use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use super::camera_stats::CameraStats;

/// Per-frame stages a camera worker times.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Capture,
    Detect,
    Embed,
    Match,
    Register,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Capture => "capture",
            Stage::Detect => "detect",
            Stage::Embed => "embed",
            Stage::Match => "match",
            Stage::Register => "register",
        };
        f.pad(name)
    }
}

/// Observer for one camera worker's loop.
///
/// Keeps the worker free of output concerns; the service logs stage
/// timings and prints a summary when the camera stops, tests stay silent.
pub trait PipelineLogger: Send {
    fn timing(&mut self, stage: Stage, duration_ms: f64);

    fn info(&mut self, message: &str);

    /// Called once when the worker stops. Default: no-op.
    fn summary(&self, _stats: &CameraStats) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn timing(&mut self, _stage: Stage, _duration_ms: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Logs through the `log` facade, prefixing every line with the camera
/// name, and accumulates stage timings for the shutdown summary.
pub struct StdoutPipelineLogger {
    camera: String,
    timings: BTreeMap<Stage, (u64, f64)>,
    started: Instant,
}

impl StdoutPipelineLogger {
    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            timings: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    /// `(calls, average ms)` for a stage.
    pub fn average(&self, stage: Stage) -> Option<(u64, f64)> {
        self.timings
            .get(&stage)
            .filter(|(calls, _)| *calls > 0)
            .map(|(calls, total)| (*calls, total / *calls as f64))
    }

    /// Returns the formatted summary, or `None` if the camera never produced
    /// a frame.
    pub fn summary_string(&self, stats: &CameraStats) -> Option<String> {
        if stats.frames_read == 0 && self.timings.is_empty() {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "[{}] Camera summary ({:.1}s): {}",
            self.camera,
            elapsed,
            stats.brief()
        )];
        for stage in self.timings.keys() {
            if let Some((calls, avg_ms)) = self.average(*stage) {
                lines.push(format!("  {stage:9}: avg {avg_ms:6.1}ms over {calls} calls"));
            }
        }
        if elapsed > 0.0 && stats.frames_processed > 0 {
            lines.push(format!(
                "  Throughput: {:.1} fps",
                stats.frames_processed as f64 / elapsed
            ));
        }
        Some(lines.join("\n"))
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn timing(&mut self, stage: Stage, duration_ms: f64) {
        let entry = self.timings.entry(stage).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += duration_ms;
    }

    fn info(&mut self, message: &str) {
        log::info!("[{}] {message}", self.camera);
    }

    fn summary(&self, stats: &CameraStats) {
        if let Some(text) = self.summary_string(stats) {
            log::info!("\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_is_silent() {
        let mut logger = NullPipelineLogger;
        logger.timing(Stage::Detect, 5.0);
        logger.info("hello");
        logger.summary(&CameraStats::default());
    }

    #[test]
    fn test_average_per_stage() {
        let mut logger = StdoutPipelineLogger::new("Curral");
        logger.timing(Stage::Detect, 20.0);
        logger.timing(Stage::Detect, 30.0);
        logger.timing(Stage::Embed, 4.0);

        let (calls, avg) = logger.average(Stage::Detect).unwrap();
        assert_eq!(calls, 2);
        assert_relative_eq!(avg, 25.0);
        assert!(logger.average(Stage::Register).is_none());
    }

    #[test]
    fn test_summary_lists_camera_and_stages() {
        let mut logger = StdoutPipelineLogger::new("Curral");
        logger.timing(Stage::Detect, 12.0);
        logger.timing(Stage::Match, 0.5);
        let stats = CameraStats {
            frames_read: 10,
            frames_processed: 10,
            ..CameraStats::default()
        };

        let summary = logger.summary_string(&stats).unwrap();
        assert!(summary.contains("[Curral] Camera summary"));
        assert!(summary.contains("detect"));
        assert!(summary.contains("match"));
        assert!(summary.contains("fps"));
    }

    #[test]
    fn test_summary_empty_when_nothing_ran() {
        let logger = StdoutPipelineLogger::new("Pasto");
        assert!(logger.summary_string(&CameraStats::default()).is_none());
    }
}
