use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::MirrorError;

/// Environment variable holding the SFTP user name.
pub const USERNAME_VAR: &str = "SFTP_USERNAME";
/// Environment variable holding the SFTP password.
pub const PASSWORD_VAR: &str = "SFTP_PASSWORD";

/// Verbosity level controlling tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Suppress all output except errors
    Quiet,
    /// Normal output (info level)
    Normal,
    /// Verbose output (debug level)
    Verbose,
    /// Maximum output (trace level)
    Trace,
}

impl From<(bool, u8)> for Verbosity {
    /// Convert from (quiet_flag, verbose_count) to Verbosity.
    ///
    /// - quiet=true -> Quiet (regardless of verbose count)
    /// - verbose=0  -> Normal
    /// - verbose=1  -> Verbose
    /// - verbose=2+ -> Trace
    fn from((quiet, verbose_count): (bool, u8)) -> Self {
        if quiet {
            Verbosity::Quiet
        } else {
            match verbose_count {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}

impl Verbosity {
    /// Return the tracing filter string for this verbosity level.
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

/// Opaque login credentials, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Read credentials from `SFTP_USERNAME` / `SFTP_PASSWORD`.
    ///
    /// An unset or empty variable is a fatal configuration error.
    pub fn from_env() -> Result<Self, MirrorError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, MirrorError> {
        let read = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or(MirrorError::MissingCredential { var })
        };
        let username = read(USERNAME_VAR)?;
        let password = read(PASSWORD_VAR)?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-operation time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Remote directory listing.
    pub list: Duration,
    /// Recursive remote size query.
    pub size: Duration,
    /// Single-file size query used when the recursive query fails.
    pub size_fallback: Duration,
    /// One file fetch attempt.
    pub file: Duration,
    /// One directory fetch attempt.
    pub directory: Duration,
    /// Time a stopping transfer gets before its sockets are shut down.
    pub grace: Duration,
    /// Inactivity limit of a single blocking protocol call.
    pub network: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(300),
            size: Duration::from_secs(300),
            size_fallback: Duration::from_secs(60),
            file: Duration::from_secs(3600),
            directory: Duration::from_secs(7200),
            grace: Duration::from_secs(5),
            network: Duration::from_secs(30),
        }
    }
}

/// `[timeouts]` table of the config file; every key optional, in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutOverrides {
    pub list_secs: Option<u64>,
    pub size_secs: Option<u64>,
    pub size_fallback_secs: Option<u64>,
    pub file_secs: Option<u64>,
    pub directory_secs: Option<u64>,
    pub grace_secs: Option<u64>,
    pub network_secs: Option<u64>,
}

impl TimeoutOverrides {
    /// Apply the overrides on top of `base`.
    pub fn apply(&self, base: Timeouts) -> Timeouts {
        let pick = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        Timeouts {
            list: pick(self.list_secs, base.list),
            size: pick(self.size_secs, base.size),
            size_fallback: pick(self.size_fallback_secs, base.size_fallback),
            file: pick(self.file_secs, base.file),
            directory: pick(self.directory_secs, base.directory),
            grace: pick(self.grace_secs, base.grace),
            network: pick(self.network_secs, base.network),
        }
    }
}

/// Serialized config file format.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub metrics_socket: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
}

/// Resolved configuration of one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub server: String,
    pub port: u16,
    pub remote_root: PathBuf,
    pub local_root: PathBuf,
    pub jobs: usize,
    pub force_all: bool,
    pub metrics_socket: PathBuf,
    pub timeouts: Timeouts,
    pub credentials: Credentials,
}

/// Strip trailing slashes from the remote root, keeping `/` itself.
pub fn normalize_remote_root(path: &str) -> PathBuf {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}
