use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::{duration_from_secs, FrameConfig};
use crate::video::VideoProcessor;

/// Sample instants `0, interval, 2*interval, ...` strictly below `duration`.
///
/// Times are computed as `index * interval` so long videos do not drift.
/// The iterator is finite and `Clone`, so a saved copy restarts the sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTimes {
    interval: f64,
    duration: f64,
    next_index: u64,
}

impl SampleTimes {
    pub fn new(duration: Duration, interval: Duration) -> Self {
        Self {
            interval: interval.as_secs_f64(),
            duration: duration.as_secs_f64(),
            next_index: 0,
        }
    }

    /// Number of instants the full sequence yields
    pub fn frame_count(&self) -> usize {
        self.remaining_from(0)
    }

    fn remaining_from(&self, index: u64) -> usize {
        if !(self.interval > 0.0) || !(self.duration > 0.0) {
            return 0;
        }
        let mut total = (self.duration / self.interval).ceil() as u64;
        // float division can land one off near exact multiples
        while total > 0 && (total - 1) as f64 * self.interval >= self.duration {
            total -= 1;
        }
        while (total as f64) * self.interval < self.duration {
            total += 1;
        }
        total.saturating_sub(index) as usize
    }
}

impl Iterator for SampleTimes {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.remaining_from(self.next_index) == 0 {
            return None;
        }
        let t = self.next_index as f64 * self.interval;
        self.next_index += 1;
        Some(t)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining_from(self.next_index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SampleTimes {}

/// File name of the 1-based `frame_number`
pub fn frame_file_name(frame_number: usize) -> String {
    format!("frame_{:04}.png", frame_number)
}

/// Outcome of extracting one video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub video: PathBuf,
    pub duration: Duration,
    pub frames: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Samples a video at a fixed interval and writes numbered PNG frames
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    processor: VideoProcessor,
    interval: Duration,
}

impl FrameExtractor {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            processor: VideoProcessor::new(),
            interval: duration_from_secs(config.interval_seconds),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Extract every sampled frame of `video_path` into `output_dir`.
    ///
    /// An unreadable video or a failed frame decode aborts the whole run.
    /// Existing frame files are overwritten.
    pub async fn extract(&self, video_path: &Path, output_dir: &Path) -> Result<ExtractionSummary> {
        let start_time = Instant::now();
        let video_info = self.processor.get_video_info(video_path).await?;

        tokio::fs::create_dir_all(output_dir).await?;

        let times = SampleTimes::new(video_info.duration, self.interval);
        info!(
            "🎞️  Sampling {} frames every {:.2}s from {}",
            times.frame_count(),
            self.interval.as_secs_f64(),
            video_info.filename
        );

        let mut frames = Vec::with_capacity(times.len());
        for (idx, t) in times.enumerate() {
            let frame_path = output_dir.join(frame_file_name(idx + 1));
            self.processor.extract_frame(video_path, t, &frame_path).await?;
            info!("Saved {}", frame_path.display());
            frames.push(frame_path);
        }

        Ok(ExtractionSummary {
            video: video_path.to_path_buf(),
            duration: video_info.duration,
            frames,
            elapsed: start_time.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_exact_multiple_duration() {
        let times: Vec<f64> = SampleTimes::new(secs(10.0), secs(2.0)).collect();
        assert_eq!(times, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_partial_last_interval() {
        let times = SampleTimes::new(secs(10.5), secs(2.0));
        assert_eq!(times.frame_count(), 6);
        assert_eq!(times.last(), Some(10.0));
    }

    #[test]
    fn test_default_interval_count_matches_ceiling() {
        let times = SampleTimes::new(secs(60.0), secs(1.85));
        assert_eq!(times.frame_count(), (60.0f64 / 1.85).ceil() as usize);
        assert!(times.clone().all(|t| t < 60.0));
        assert_eq!(times.count(), 33);
    }

    #[test]
    fn test_restartable_from_clone() {
        let mut times = SampleTimes::new(secs(5.0), secs(1.0));
        let saved = times.clone();
        times.next();
        times.next();
        assert_eq!(times.len(), 3);
        assert_eq!(saved.collect::<Vec<_>>().len(), 5);
    }

    #[test]
    fn test_degenerate_inputs_yield_nothing() {
        assert_eq!(SampleTimes::new(secs(0.0), secs(1.0)).count(), 0);
        assert_eq!(SampleTimes::new(secs(3.0), Duration::ZERO).count(), 0);
    }

    #[test]
    fn test_frame_file_names_are_one_based_and_padded() {
        assert_eq!(frame_file_name(1), "frame_0001.png");
        assert_eq!(frame_file_name(42), "frame_0042.png");
        assert_eq!(frame_file_name(12345), "frame_12345.png");
    }
}
