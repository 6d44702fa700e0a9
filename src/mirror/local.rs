//! Byte totals of the local copy.

use std::path::Path;

use walkdir::WalkDir;

/// Local side of the size comparison.
pub struct LocalCatalog;

impl LocalCatalog {
    /// Content bytes of a file, or of every regular file under a directory.
    ///
    /// `None` when the path does not exist. Symlinks inside a tree are not
    /// followed and count as zero; unreadable entries are skipped.
    pub fn size(path: &Path) -> Option<u64> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_dir() {
            return Some(meta.len());
        }

        let mut total = 0u64;
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable local entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                match entry.metadata() {
                    Ok(meta) => total += meta.len(),
                    Err(e) => tracing::debug!("Skipping {}: {}", entry.path().display(), e),
                }
            }
        }
        Some(total)
    }
}
