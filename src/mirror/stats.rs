//! Run statistics and the closing summary.

use std::time::{Duration, Instant};

use bytesize::ByteSize;

use crate::metrics::line::LinePoint;
use crate::metrics::SUMMARY_MEASUREMENT;

/// Aggregate owned by the scheduler thread for one run.
#[derive(Debug)]
pub struct MirrorRunStats {
    pub files_downloaded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub bytes_downloaded: u64,
    pub file_durations: Vec<f64>,
    pub started: Instant,
}

impl MirrorRunStats {
    pub fn new() -> Self {
        Self {
            files_downloaded: 0,
            files_skipped: 0,
            files_failed: 0,
            bytes_downloaded: 0,
            file_durations: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Record a downloaded file and its transfer time.
    pub fn add_file(&mut self, bytes: u64, duration: Duration) {
        self.files_downloaded += 1;
        self.bytes_downloaded += bytes;
        self.file_durations.push(duration.as_secs_f64());
    }

    /// Record a downloaded directory. Its time stays out of the file average.
    pub fn add_directory(&mut self, bytes: u64) {
        self.files_downloaded += 1;
        self.bytes_downloaded += bytes;
    }

    pub fn add_skipped(&mut self) {
        self.files_skipped += 1;
    }

    pub fn add_failed(&mut self) {
        self.files_failed += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Mean file transfer time in seconds; 0 when no file was transferred.
    pub fn average_file_duration(&self) -> f64 {
        if self.file_durations.is_empty() {
            0.0
        } else {
            self.file_durations.iter().sum::<f64>() / self.file_durations.len() as f64
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            files_downloaded: self.files_downloaded,
            files_skipped: self.files_skipped,
            files_failed: self.files_failed,
            bytes_downloaded: self.bytes_downloaded,
            duration: self.elapsed(),
            avg_file_duration: self.average_file_duration(),
        }
    }
}

impl Default for MirrorRunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen view of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub files_downloaded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub bytes_downloaded: u64,
    pub duration: Duration,
    pub avg_file_duration: f64,
}

impl RunSummary {
    /// ```text
    /// Mirror complete. Downloaded 4 items, skipped 12, failed 0, total 5242880 bytes (5.0 MiB) in 8.31s
    /// ```
    pub fn log_line(&self) -> String {
        format!(
            "Mirror complete. Downloaded {} items, skipped {}, failed {}, total {} bytes ({}) in {:.2}s",
            self.files_downloaded,
            self.files_skipped,
            self.files_failed,
            self.bytes_downloaded,
            ByteSize(self.bytes_downloaded),
            self.duration.as_secs_f64(),
        )
    }

    pub fn to_point(&self, server: &str, remote_path: &str) -> LinePoint {
        LinePoint::new(SUMMARY_MEASUREMENT)
            .tag("server", server)
            .tag("remote_path", remote_path)
            .field("files_downloaded", self.files_downloaded as f64)
            .field("files_skipped", self.files_skipped as f64)
            .field("bytes_downloaded", self.bytes_downloaded as f64)
            .field("duration_seconds", self.duration.as_secs_f64())
            .field("avg_file_duration_seconds", self.avg_file_duration)
    }
}
