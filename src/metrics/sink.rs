//! Destinations for metric points.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use super::line::LinePoint;

/// Write timeout for one point.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives metric points. Delivery is best effort: implementations log
/// failures and never return them to the caller.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, point: &LinePoint);
}

/// Sends each point over a fresh connection to a Unix stream socket.
#[derive(Debug, Clone)]
pub struct UnixSocketSink {
    path: PathBuf,
}

impl UnixSocketSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn send(&self, line: &str) -> std::io::Result<()> {
        let mut stream = UnixStream::connect(&self.path)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()
    }
}

impl MetricsSink for UnixSocketSink {
    fn emit(&self, point: &LinePoint) {
        let line = point.to_line();
        match self.send(&line) {
            Ok(()) => tracing::trace!("Metric sent: {}", line),
            Err(e) => tracing::warn!(
                "Failed to send metric to {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Keeps every point in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    points: std::sync::Mutex<Vec<LinePoint>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn points(&self) -> Vec<LinePoint> {
        self.points.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl MetricsSink for RecordingSink {
    fn emit(&self, point: &LinePoint) {
        self.points.lock().unwrap().push(point.clone());
    }
}
