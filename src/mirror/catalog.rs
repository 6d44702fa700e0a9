//! Remote side of the mirror: listing, sizes and fetches below one root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{DirectoryFetch, RemoteClient};
use crate::error::MirrorError;
use crate::transfer::control::TransferControl;

/// Top-level children of the remote root, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }
}

#[derive(Clone)]
pub struct RemoteCatalog {
    client: Arc<dyn RemoteClient>,
    root: PathBuf,
}

impl RemoteCatalog {
    pub fn new(client: Arc<dyn RemoteClient>, root: PathBuf) -> Self {
        Self { client, root }
    }

    fn item_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// List the root. A failure is logged and yields an empty listing.
    pub fn list(&self) -> Listing {
        let entries = match self.client.read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                let err = MirrorError::ListingFailed {
                    path: self.root.clone(),
                    reason: e.to_string(),
                };
                tracing::error!("{}", err);
                return Listing::default();
            }
        };

        let mut listing = Listing::default();
        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            if entry.is_dir() {
                listing.directories.push(entry.name);
            } else {
                listing.files.push(entry.name);
            }
        }
        listing
    }

    /// Remote size of a top-level item, or `None` if it cannot be learned.
    ///
    /// Files fall back to a plain stat when the recursive query fails.
    pub fn size(&self, name: &str, is_dir: bool) -> Option<u64> {
        let path = self.item_path(name);
        match self.client.disk_usage(&path) {
            Ok(size) => return Some(size),
            Err(e) => tracing::debug!("Recursive size query failed for {}: {}", name, e),
        }
        if is_dir {
            return None;
        }
        match self.client.file_size(&path) {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::debug!("Size query failed for {}: {}", name, e);
                None
            }
        }
    }

    /// Fetch one top-level file to `dest`. Returns the final local size.
    pub fn fetch_file(
        &self,
        name: &str,
        dest: &Path,
        control: &TransferControl,
    ) -> Result<u64, MirrorError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.client.fetch_file(&self.item_path(name), dest, control)
    }

    /// Fetch one top-level directory into `dest` with `jobs` workers.
    pub fn fetch_directory(
        &self,
        name: &str,
        dest: &Path,
        jobs: usize,
        control: &TransferControl,
    ) -> Result<DirectoryFetch, MirrorError> {
        std::fs::create_dir_all(dest)?;
        self.client
            .fetch_dir(&self.item_path(name), dest, jobs, control)
    }
}
