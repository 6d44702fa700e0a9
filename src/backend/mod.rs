#[cfg(test)]
pub mod local;
pub mod sftp;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::MirrorError;
use crate::transfer::control::TransferControl;

/// Classification of a remote child as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Totals of a completed directory fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryFetch {
    pub files: u64,
    pub bytes: u64,
}

/// One file of a directory fetch: where it lives remotely and where it lands.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub remote: PathBuf,
    pub local: PathBuf,
}

impl fmt::Display for FileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote.display())
    }
}

/// Narrow seam over the remote-file-access library.
///
/// Every call blocks. Implementations bound each call with their own
/// timeouts and must honor `TransferControl` checkpoints during fetches.
pub trait RemoteClient: Send + Sync {
    /// List the direct children of `path`, excluding `.` and `..`.
    fn read_dir(&self, path: &Path) -> Result<Vec<RemoteEntry>, MirrorError>;

    /// Total content bytes of `path` (recursively for directories).
    fn disk_usage(&self, path: &Path) -> Result<u64, MirrorError>;

    /// Size of a single file.
    fn file_size(&self, path: &Path) -> Result<u64, MirrorError>;

    /// Download one file into `local`, continuing a partial copy.
    /// Returns the final local file size.
    fn fetch_file(
        &self,
        remote: &Path,
        local: &Path,
        control: &TransferControl,
    ) -> Result<u64, MirrorError>;

    /// Download a directory tree into `local` with `jobs` concurrent workers.
    fn fetch_dir(
        &self,
        remote: &Path,
        local: &Path,
        jobs: usize,
        control: &TransferControl,
    ) -> Result<DirectoryFetch, MirrorError>;
}

/// Turn a pool report into the outcome of a directory fetch.
pub(crate) fn finish_directory_fetch(
    remote: &Path,
    report: crate::transfer::pool::PoolReport,
    control: &TransferControl,
) -> Result<DirectoryFetch, MirrorError> {
    control.checkpoint()?;
    if !report.is_clean() {
        let mut reason = format!(
            "{} file(s) failed, {} not transferred",
            report.failures.len(),
            report.unprocessed
        );
        if let Some((item, err)) = report.failures.first() {
            reason.push_str(&format!("; first failure: {}: {}", item, err));
        } else if let Some((idx, err)) = report.connect_failures.first() {
            reason.push_str(&format!("; worker {} could not connect: {}", idx, err));
        }
        return Err(MirrorError::TransferFailed {
            item: remote.display().to_string(),
            reason,
        });
    }
    Ok(DirectoryFetch {
        files: report.completed,
        bytes: report.bytes,
    })
}
