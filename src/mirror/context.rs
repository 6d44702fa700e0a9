//! State shared between the mirror run and the signal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::StopReason;
use crate::transfer::control::TransferControl;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run-scoped cancellation flag plus the handle of the in-flight transfer.
#[derive(Debug)]
pub struct RunContext {
    cancelled: AtomicBool,
    current: Mutex<Option<Arc<TransferControl>>>,
    grace: Duration,
}

impl RunContext {
    /// `grace` is how long `stop_current` waits before forcing a stop.
    pub fn new(grace: Duration) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            current: Mutex::new(None),
            grace,
        }
    }

    /// Set the cancellation flag. Returns true only for the first call.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Publish `control` as the in-flight transfer.
    ///
    /// If cancellation already happened, the transfer is told to stop
    /// right away, so a signal arriving between the caller's flag check
    /// and this call is never lost.
    pub fn begin_transfer(&self, control: Arc<TransferControl>) {
        let mut current = self.lock_current();
        if self.is_cancelled() {
            control.request_stop(StopReason::Cancelled);
        }
        *current = Some(control);
    }

    /// Clear the in-flight handle if it is still `control`.
    pub fn end_transfer(&self, control: &Arc<TransferControl>) {
        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, control)) {
            *current = None;
        }
    }

    pub fn current_transfer(&self) -> Option<Arc<TransferControl>> {
        self.lock_current().clone()
    }

    /// Stop the in-flight transfer: ask nicely, wait out the grace window,
    /// then cut its connections.
    pub fn stop_current(&self) {
        let Some(control) = self.current_transfer() else {
            return;
        };
        control.request_stop(StopReason::Cancelled);

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if !self.is_current(&control) {
                return;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        if self.is_current(&control) {
            tracing::warn!(
                "Transfer still running after {:.1}s, closing its connections",
                self.grace.as_secs_f64()
            );
            control.force_stop();
        }
    }

    fn is_current(&self, control: &Arc<TransferControl>) -> bool {
        self.lock_current()
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, control))
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<TransferControl>>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
