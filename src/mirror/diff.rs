//! Size-only change detection for top-level items.

use std::path::PathBuf;

use super::catalog::RemoteCatalog;
use super::local::LocalCatalog;

/// Why an item is or is not downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDecision {
    /// `--all` was given; no sizes were queried.
    Forced,
    MissingLocally,
    /// The remote size could not be learned, so the item is refreshed.
    RemoteSizeUnknown,
    SizeChanged { local: u64, remote: u64 },
    Unchanged { size: u64 },
}

impl DiffDecision {
    pub fn needs_download(&self) -> bool {
        !matches!(self, DiffDecision::Unchanged { .. })
    }
}

/// Size-only change detection between the remote root and the local root.
pub struct DiffDecider {
    catalog: RemoteCatalog,
    local_root: PathBuf,
    force_all: bool,
}

impl DiffDecider {
    pub fn new(catalog: RemoteCatalog, local_root: PathBuf, force_all: bool) -> Self {
        Self {
            catalog,
            local_root,
            force_all,
        }
    }

    pub fn decide(&self, name: &str, is_dir: bool) -> DiffDecision {
        if self.force_all {
            return DiffDecision::Forced;
        }
        let Some(local) = LocalCatalog::size(&self.local_root.join(name)) else {
            return DiffDecision::MissingLocally;
        };
        let Some(remote) = self.catalog.size(name, is_dir) else {
            tracing::warn!("Could not get remote size for {}, will download", name);
            return DiffDecision::RemoteSizeUnknown;
        };
        if remote == local {
            DiffDecision::Unchanged { size: local }
        } else {
            DiffDecision::SizeChanged { local, remote }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalTreeClient;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    struct Fixture {
        remote: tempfile::TempDir,
        local: tempfile::TempDir,
        client: Arc<LocalTreeClient>,
    }

    impl Fixture {
        fn new() -> Self {
            let remote = tempfile::tempdir().unwrap();
            std::fs::write(remote.path().join("data.bin"), vec![0u8; 8]).unwrap();
            std::fs::create_dir(remote.path().join("2024-06")).unwrap();
            std::fs::write(remote.path().join("2024-06/x"), vec![0u8; 3]).unwrap();
            Self {
                remote,
                local: tempfile::tempdir().unwrap(),
                client: Arc::new(LocalTreeClient::new()),
            }
        }

        fn decider(&self, force_all: bool) -> DiffDecider {
            let catalog = RemoteCatalog::new(self.client.clone(), self.remote.path().into());
            DiffDecider::new(catalog, self.local.path().into(), force_all)
        }
    }

    #[test]
    fn force_all_queries_nothing() {
        let fx = Fixture::new();
        std::fs::write(fx.local.path().join("data.bin"), vec![0u8; 8]).unwrap();
        let decider = fx.decider(true);
        assert_eq!(decider.decide("data.bin", false), DiffDecision::Forced);
        assert_eq!(decider.decide("2024-06", true), DiffDecision::Forced);
        assert_eq!(fx.client.size_queries(), 0);
    }

    #[test]
    fn missing_local_downloads_without_remote_query() {
        let fx = Fixture::new();
        fx.client.fail_disk_usage.store(true, Ordering::SeqCst);
        fx.client.fail_file_size.store(true, Ordering::SeqCst);
        let decider = fx.decider(false);
        assert_eq!(decider.decide("data.bin", false), DiffDecision::MissingLocally);
        assert!(decider.decide("2024-06", true).needs_download());
        assert_eq!(fx.client.size_queries(), 0);
    }

    #[test]
    fn unknown_remote_size_downloads() {
        let fx = Fixture::new();
        std::fs::write(fx.local.path().join("data.bin"), vec![0u8; 8]).unwrap();
        fx.client.fail_disk_usage.store(true, Ordering::SeqCst);
        fx.client.fail_file_size.store(true, Ordering::SeqCst);
        assert_eq!(
            fx.decider(false).decide("data.bin", false),
            DiffDecision::RemoteSizeUnknown
        );
    }

    #[test]
    fn equal_sizes_skip_and_any_difference_downloads() {
        let fx = Fixture::new();
        std::fs::write(fx.local.path().join("data.bin"), vec![0u8; 8]).unwrap();
        std::fs::create_dir(fx.local.path().join("2024-06")).unwrap();
        std::fs::write(fx.local.path().join("2024-06/x"), vec![0u8; 2]).unwrap();
        let decider = fx.decider(false);

        assert_eq!(
            decider.decide("data.bin", false),
            DiffDecision::Unchanged { size: 8 }
        );
        assert_eq!(
            decider.decide("2024-06", true),
            DiffDecision::SizeChanged { local: 2, remote: 3 }
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_unchanged_after_fetch() {
        let fx = Fixture::new();
        let remote = fx.remote.path();
        std::os::unix::fs::symlink(remote.join("2024-06"), remote.join("latest")).unwrap();
        std::fs::create_dir(fx.local.path().join("latest")).unwrap();
        std::fs::write(fx.local.path().join("latest/x"), vec![0u8; 3]).unwrap();
        assert_eq!(
            fx.decider(false).decide("latest", true),
            DiffDecision::Unchanged { size: 3 }
        );
    }
}
