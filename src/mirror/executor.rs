//! One supervised transfer attempt.
//!
//! The fetch runs on its own thread so the run driver can enforce a
//! wall-clock limit. When the limit passes, the transfer is asked to stop,
//! gets the grace window, and then has its connections shut down.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::types::Timeouts;
use crate::error::{MirrorError, StopReason};
use crate::transfer::control::TransferControl;

use super::catalog::RemoteCatalog;
use super::context::RunContext;
use super::local::LocalCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

/// Result of one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    pub bytes: u64,
    pub duration: Duration,
}

impl TransferOutcome {
    fn unsuccessful(status: TransferStatus, duration: Duration) -> Self {
        Self {
            status,
            bytes: 0,
            duration,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TransferStatus::Completed
    }
}

pub struct TransferExecutor {
    catalog: RemoteCatalog,
    context: Arc<RunContext>,
    timeouts: Timeouts,
    jobs: usize,
}

impl TransferExecutor {
    pub fn new(
        catalog: RemoteCatalog,
        context: Arc<RunContext>,
        timeouts: Timeouts,
        jobs: usize,
    ) -> Self {
        Self {
            catalog,
            context,
            timeouts,
            jobs,
        }
    }

    /// Fetch one top-level file. Bytes are the final local size.
    pub fn fetch_file(&self, name: &str, dest: &Path) -> TransferOutcome {
        let catalog = self.catalog.clone();
        let (item, target) = (name.to_string(), dest.to_path_buf());
        self.supervise("file", name, self.timeouts.file, move |control| {
            catalog.fetch_file(&item, &target, &control)
        })
    }

    /// Fetch one top-level directory. Bytes are the local tree size afterwards.
    pub fn fetch_directory(&self, name: &str, dest: &Path) -> TransferOutcome {
        let catalog = self.catalog.clone();
        let jobs = self.jobs;
        let (item, target) = (name.to_string(), dest.to_path_buf());
        let mut outcome = self.supervise("directory", name, self.timeouts.directory, move |control| {
            let fetched = catalog.fetch_directory(&item, &target, jobs, &control)?;
            tracing::debug!("{}: {} file(s), {} bytes", item, fetched.files, fetched.bytes);
            Ok(fetched.bytes)
        });
        if outcome.succeeded() {
            outcome.bytes = LocalCatalog::size(dest).unwrap_or(0);
        }
        outcome
    }

    fn supervise<F>(&self, kind: &str, name: &str, limit: Duration, job: F) -> TransferOutcome
    where
        F: FnOnce(Arc<TransferControl>) -> Result<u64, MirrorError> + Send + 'static,
    {
        let started = Instant::now();
        if self.context.is_cancelled() {
            return TransferOutcome::unsuccessful(TransferStatus::Cancelled, Duration::ZERO);
        }

        let control = Arc::new(TransferControl::new());
        self.context.begin_transfer(Arc::clone(&control));
        let result = self.run_bounded(name, &control, limit, job);
        self.context.end_transfer(&control);
        let duration = started.elapsed();

        let error = match result {
            Some(Ok(bytes)) => {
                return TransferOutcome {
                    status: TransferStatus::Completed,
                    bytes,
                    duration,
                }
            }
            Some(Err(e)) => Some(e),
            None => None,
        };

        match control.stop_reason() {
            Some(StopReason::Cancelled) => {
                tracing::warn!("Download of {} {} interrupted by stop request", kind, name);
                TransferOutcome::unsuccessful(TransferStatus::Cancelled, duration)
            }
            Some(StopReason::TimedOut) => {
                tracing::error!(
                    "Timeout downloading {} {} after {:.0}s{}",
                    kind,
                    name,
                    limit.as_secs_f64(),
                    if control.was_forced() { " (connections closed)" } else { "" }
                );
                TransferOutcome::unsuccessful(TransferStatus::TimedOut, duration)
            }
            None => {
                match error {
                    Some(e) => tracing::error!("Error downloading {} {}: {}", kind, name, e),
                    None => tracing::error!("Error downloading {} {}: no result", kind, name),
                }
                TransferOutcome::unsuccessful(TransferStatus::Failed, duration)
            }
        }
    }

    /// Run `job` on a worker thread, stopping it if `limit` passes.
    ///
    /// `None` means the worker never reported back, even after its
    /// connections were shut down; the thread is left to finish on its own.
    fn run_bounded<F>(
        &self,
        name: &str,
        control: &Arc<TransferControl>,
        limit: Duration,
        job: F,
    ) -> Option<Result<u64, MirrorError>>
    where
        F: FnOnce(Arc<TransferControl>) -> Result<u64, MirrorError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let worker_control = Arc::clone(control);
        let spawned = std::thread::Builder::new()
            .name("mirror-transfer".to_string())
            .spawn(move || {
                let _ = tx.send(job(worker_control));
            });
        if let Err(e) = spawned {
            return Some(Err(e.into()));
        }

        match rx.recv_timeout(limit) {
            Ok(result) => return Some(result),
            Err(RecvTimeoutError::Disconnected) => {
                return Some(Err(MirrorError::TransferFailed {
                    item: name.to_string(),
                    reason: "transfer thread exited without a result".to_string(),
                }))
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        control.request_stop(StopReason::TimedOut);
        if let Ok(result) = rx.recv_timeout(self.timeouts.grace) {
            return Some(result);
        }
        tracing::warn!(
            "{} did not stop within {:.1}s, closing its connections",
            name,
            self.timeouts.grace.as_secs_f64()
        );
        control.force_stop();
        rx.recv_timeout(self.timeouts.grace).ok()
    }
}
