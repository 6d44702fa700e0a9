//! Stop handle shared between a running transfer and whoever may end it.
//!
//! A stop happens in two steps. `request_stop` records a reason that the
//! transfer observes at its next `checkpoint` (between chunks and between
//! files). If it does not return within the grace window, `force_stop`
//! shuts down every socket the transfer registered, which makes any
//! blocked protocol call fail immediately.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::{MirrorError, StopReason};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const TIMED_OUT: u8 = 2;

#[derive(Debug, Default)]
pub struct TransferControl {
    reason: AtomicU8,
    forced: AtomicBool,
    sockets: Mutex<Vec<TcpStream>>,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the transfer to stop. The first recorded reason wins.
    pub fn request_stop(&self, reason: StopReason) {
        let code = match reason {
            StopReason::Cancelled => CANCELLED,
            StopReason::TimedOut => TIMED_OUT,
        };
        let _ = self
            .reason
            .compare_exchange(RUNNING, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.reason.load(Ordering::SeqCst) {
            CANCELLED => Some(StopReason::Cancelled),
            TIMED_OUT => Some(StopReason::TimedOut),
            _ => None,
        }
    }

    /// Fail with `Stopped` once a stop has been requested.
    pub fn checkpoint(&self) -> Result<(), MirrorError> {
        match self.stop_reason() {
            Some(reason) => Err(MirrorError::Stopped(reason)),
            None => Ok(()),
        }
    }

    /// Track a connection so `force_stop` can cut it.
    ///
    /// A socket registered after a forced stop is shut down right away.
    pub fn register_socket(&self, socket: TcpStream) {
        let mut sockets = self.lock_sockets();
        if self.forced.load(Ordering::SeqCst) {
            let _ = socket.shutdown(Shutdown::Both);
        }
        sockets.push(socket);
    }

    /// Shut down every registered connection.
    pub fn force_stop(&self) {
        let sockets = self.lock_sockets();
        self.forced.store(true, Ordering::SeqCst);
        for socket in sockets.iter() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                tracing::debug!("Socket shutdown during forced stop: {}", e);
            }
        }
    }

    pub fn was_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }

    fn lock_sockets(&self) -> std::sync::MutexGuard<'_, Vec<TcpStream>> {
        // A panic while holding this lock cannot leave the Vec inconsistent.
        self.sockets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
