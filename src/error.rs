use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why an in-flight transfer was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator interrupt or service-manager stop.
    Cancelled,
    /// The per-attempt wall-clock budget ran out.
    TimedOut,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("{var} environment variable not set")]
    MissingCredential { var: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed to sftp://{host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Remote operation failed on {}: {reason}", path.display())]
    Remote { path: PathBuf, reason: String },

    #[error("Listing failed for {}: {reason}", path.display())]
    ListingFailed { path: PathBuf, reason: String },

    #[error("Transfer of {item} failed: {reason}")]
    TransferFailed { item: String, reason: String },

    #[error("Transfer {0}")]
    Stopped(StopReason),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl MirrorError {
    /// Returns a user-friendly suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            MirrorError::MissingCredential { .. } => {
                Some("Export SFTP_USERNAME and SFTP_PASSWORD before starting the mirror.")
            }
            MirrorError::Config(_) => {
                Some("Check the config file: only `metrics_socket` and a [timeouts] table are recognized.")
            }
            MirrorError::ConnectionFailed { .. } => {
                Some("Check that the host is reachable, the port is correct and the credentials are valid.")
            }
            MirrorError::Stopped(StopReason::TimedOut) => {
                Some("Raise the timeout in the [timeouts] section of the config file.")
            }
            _ => None,
        }
    }
}

impl From<walkdir::Error> for MirrorError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        match err.into_io_error() {
            Some(source) => MirrorError::Io { source },
            None => MirrorError::Remote {
                path: path.unwrap_or_default(),
                reason: "filesystem loop detected".to_string(),
            },
        }
    }
}

impl From<toml::de::Error> for MirrorError {
    fn from(err: toml::de::Error) -> Self {
        MirrorError::Config(format!("Invalid config file: {}", err))
    }
}
