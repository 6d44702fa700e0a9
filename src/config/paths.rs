//! Config file discovery and run-configuration resolution.
//!
//! Uses the `dirs` crate to resolve the platform config directory:
//! - Linux:   `~/.config/sftp-mirror/config.toml`
//! - macOS:   `~/Library/Application Support/sftp-mirror/config.toml`
//!
//! Precedence is CLI flag > config file > built-in default.

use std::path::{Path, PathBuf};

use crate::cli::args::{Cli, DEFAULT_METRICS_SOCKET};
use crate::error::MirrorError;

use super::types::{normalize_remote_root, ConfigFile, Credentials, MirrorConfig, Timeouts};

/// Default location of the optional config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sftp-mirror").join("config.toml"))
}

/// Load the config file.
///
/// An explicitly requested file must exist. The default location is only
/// read when present; its absence yields an empty config.
pub fn load_config_file(explicit: Option<&Path>) -> Result<ConfigFile, MirrorError> {
    let path = match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(MirrorError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(ConfigFile::default()),
        },
    };

    tracing::debug!(path = %path.display(), "Loading config file");
    let contents = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&contents)?)
}

/// Merge CLI arguments, the config file and credentials into a run config.
pub fn resolve_config(
    cli: &Cli,
    file: ConfigFile,
    credentials: Credentials,
) -> MirrorConfig {
    let metrics_socket = cli
        .metrics_socket
        .clone()
        .or(file.metrics_socket)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_SOCKET));

    MirrorConfig {
        server: cli.server.clone(),
        port: cli.port,
        remote_root: normalize_remote_root(&cli.remote_path),
        local_root: cli.local_path.clone(),
        jobs: usize::from(cli.jobs),
        force_all: cli.all,
        metrics_socket,
        timeouts: file.timeouts.apply(Timeouts::default()),
        credentials,
    }
}
