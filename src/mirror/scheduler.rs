//! The run driver: directories newest-first, then files, one at a time.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::types::MirrorConfig;
use crate::metrics::line::LinePoint;
use crate::metrics::sink::MetricsSink;
use crate::metrics::DOWNLOAD_MEASUREMENT;

use super::catalog::RemoteCatalog;
use super::context::RunContext;
use super::diff::DiffDecider;
use super::executor::{TransferExecutor, TransferOutcome, TransferStatus};
use super::stats::{MirrorRunStats, RunSummary};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,
    /// A stop was requested at some point during the run.
    pub cancelled: bool,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    File,
    Directory,
}

impl ItemKind {
    fn label(self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Directory => "directory",
        }
    }
}

/// Directories in processing order: descending by name.
pub fn directory_order(mut directories: Vec<String>) -> Vec<String> {
    directories.sort_by(|a, b| b.cmp(a));
    directories
}

pub struct MirrorScheduler {
    server: String,
    remote_label: String,
    local_root: PathBuf,
    catalog: RemoteCatalog,
    decider: DiffDecider,
    executor: TransferExecutor,
    sink: Arc<dyn MetricsSink>,
    context: Arc<RunContext>,
}

impl MirrorScheduler {
    pub fn new(
        config: &MirrorConfig,
        catalog: RemoteCatalog,
        sink: Arc<dyn MetricsSink>,
        context: Arc<RunContext>,
    ) -> Self {
        let decider = DiffDecider::new(catalog.clone(), config.local_root.clone(), config.force_all);
        let executor = TransferExecutor::new(
            catalog.clone(),
            Arc::clone(&context),
            config.timeouts,
            config.jobs,
        );
        Self {
            server: config.server.clone(),
            remote_label: config.remote_root.display().to_string(),
            local_root: config.local_root.clone(),
            catalog,
            decider,
            executor,
            sink,
            context,
        }
    }

    pub fn run(&self) -> RunReport {
        let mut stats = MirrorRunStats::new();
        tracing::info!(
            "Starting mirror: {}{} -> {}",
            self.server,
            self.remote_label,
            self.local_root.display()
        );

        let listing = self.catalog.list();
        tracing::info!(
            "Found {} files and {} directories",
            listing.files.len(),
            listing.directories.len()
        );
        if listing.is_empty() {
            tracing::info!("Nothing to mirror under {}", self.remote_label);
        }

        let directories = directory_order(listing.directories);
        let work = directories
            .iter()
            .map(|name| (name, ItemKind::Directory))
            .chain(listing.files.iter().map(|name| (name, ItemKind::File)));
        for (name, kind) in work {
            if self.context.is_cancelled() {
                tracing::warn!("Stop requested, exiting...");
                break;
            }
            self.process(name, kind, &mut stats);
        }

        let summary = stats.summary();
        tracing::info!("{}", summary.log_line());
        self.sink
            .emit(&summary.to_point(&self.server, &self.remote_label));

        RunReport {
            summary,
            cancelled: self.context.is_cancelled(),
        }
    }

    fn process(&self, name: &str, kind: ItemKind, stats: &mut MirrorRunStats) {
        let is_dir = kind == ItemKind::Directory;
        let decision = self.decider.decide(name, is_dir);
        if !decision.needs_download() {
            tracing::info!("Skipping {} {} (size matches)", kind.label(), name);
            stats.add_skipped();
            return;
        }
        tracing::debug!("{}: {:?}", name, decision);

        tracing::info!("Downloading {}: {}", kind.label(), name);
        let dest = self.local_root.join(name);
        let outcome = match kind {
            ItemKind::Directory => self.executor.fetch_directory(name, &dest),
            ItemKind::File => self.executor.fetch_file(name, &dest),
        };

        match outcome.status {
            TransferStatus::Completed => {
                let secs = outcome.duration.as_secs_f64();
                match kind {
                    ItemKind::Directory => {
                        stats.add_directory(outcome.bytes);
                        tracing::info!("Downloaded directory {} in {:.2}s", name, secs);
                    }
                    ItemKind::File => {
                        stats.add_file(outcome.bytes, outcome.duration);
                        tracing::info!(
                            "Downloaded {} ({} bytes) in {:.2}s",
                            name,
                            outcome.bytes,
                            secs
                        );
                    }
                }
                self.sink.emit(&self.download_point(kind, name, &outcome));
            }
            TransferStatus::Failed | TransferStatus::TimedOut => {
                stats.add_failed();
                tracing::error!("Failed to download {} {}", kind.label(), name);
            }
            TransferStatus::Cancelled => {}
        }
    }

    fn download_point(&self, kind: ItemKind, name: &str, outcome: &TransferOutcome) -> LinePoint {
        let bytes = outcome.bytes as f64;
        let secs = outcome.duration.as_secs_f64();
        let rate = if secs > 0.0 { bytes / secs } else { 0.0 };
        LinePoint::new(DOWNLOAD_MEASUREMENT)
            .tag("server", self.server.as_str())
            .tag("type", kind.label())
            .tag("item", name)
            .field("bytes", bytes)
            .field("duration_seconds", secs)
            .field("bytes_per_second", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalTreeClient;
    use crate::config::types::{Credentials, Timeouts};
    use crate::metrics::sink::RecordingSink;
    use crate::metrics::SUMMARY_MEASUREMENT;
    use crate::mirror::local::LocalCatalog;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Harness {
        remote: tempfile::TempDir,
        local: tempfile::TempDir,
        client: Arc<LocalTreeClient>,
        sink: Arc<RecordingSink>,
        context: Arc<RunContext>,
    }

    impl Harness {
        fn new() -> Self {
            let remote = tempfile::tempdir().unwrap();
            for dir in ["2023-01", "2024-06", "2022-11"] {
                std::fs::create_dir_all(remote.path().join(dir).join("day")).unwrap();
                std::fs::write(remote.path().join(dir).join("day/log.txt"), dir.as_bytes())
                    .unwrap();
            }
            std::fs::write(remote.path().join("index.csv"), b"a,b,c\n").unwrap();
            std::fs::write(remote.path().join("notes with spaces.txt"), b"hello").unwrap();
            Self {
                remote,
                local: tempfile::tempdir().unwrap(),
                client: Arc::new(LocalTreeClient::new()),
                sink: Arc::new(RecordingSink::default()),
                context: Arc::new(RunContext::new(Duration::from_millis(50))),
            }
        }

        fn config(&self, force_all: bool, timeouts: Timeouts) -> MirrorConfig {
            MirrorConfig {
                server: "sftp.example.com".to_string(),
                port: 22,
                remote_root: self.remote.path().to_path_buf(),
                local_root: self.local.path().to_path_buf(),
                jobs: 3,
                force_all,
                metrics_socket: PathBuf::from("/nonexistent/telegraf.sock"),
                timeouts,
                credentials: Credentials {
                    username: "u".to_string(),
                    password: "p".to_string(),
                },
            }
        }

        fn run_with(&self, force_all: bool, timeouts: Timeouts) -> RunReport {
            let config = self.config(force_all, timeouts);
            let catalog = RemoteCatalog::new(self.client.clone(), config.remote_root.clone());
            MirrorScheduler::new(&config, catalog, self.sink.clone(), self.context.clone()).run()
        }

        fn run(&self) -> RunReport {
            self.run_with(false, Timeouts::default())
        }

        fn fetched_names(&self) -> Vec<String> {
            self.client
                .fetches()
                .iter()
                .map(|p| {
                    Path::new(p)
                        .file_name()
                        .unwrap()
                        .to_string_lossy()
                        .into_owned()
                })
                .collect()
        }
    }

    #[test]
    fn directories_sorted_descending() {
        let dirs = vec!["2023-01".to_string(), "2024-06".into(), "2022-11".into()];
        assert_eq!(directory_order(dirs), vec!["2024-06", "2023-01", "2022-11"]);
    }

    #[test]
    fn directories_first_newest_first_then_files() {
        let h = Harness::new();
        let report = h.run();

        let fetched = h.fetched_names();
        assert_eq!(&fetched[..3], ["2024-06", "2023-01", "2022-11"]);
        let mut files = fetched[3..].to_vec();
        files.sort();
        assert_eq!(files, vec!["index.csv", "notes with spaces.txt"]);

        assert_eq!(report.summary.files_downloaded, 5);
        assert_eq!(report.summary.files_skipped, 0);
        assert_eq!(report.summary.bytes_downloaded, 3 * 7 + 6 + 5);
        assert!(!report.cancelled);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            std::fs::read(h.local.path().join("2024-06/day/log.txt")).unwrap(),
            b"2024-06"
        );
    }

    #[test]
    fn second_run_skips_everything() {
        let h = Harness::new();
        h.run();
        let before = LocalCatalog::size(h.local.path());
        let fetches_after_first = h.client.fetches().len();

        let report = h.run();
        assert_eq!(report.summary.files_downloaded, 0);
        assert_eq!(report.summary.files_skipped, 5);
        assert_eq!(h.client.fetches().len(), fetches_after_first);
        assert_eq!(LocalCatalog::size(h.local.path()), before);
    }

    #[test]
    fn force_all_downloads_without_size_queries() {
        let h = Harness::new();
        h.run();
        let queries_before = h.client.size_queries();

        let report = h.run_with(true, Timeouts::default());
        assert_eq!(report.summary.files_downloaded, 5);
        assert_eq!(report.summary.files_skipped, 0);
        assert_eq!(h.client.size_queries(), queries_before);
    }

    #[test]
    fn changed_file_is_refetched() {
        let h = Harness::new();
        h.run();
        std::fs::write(h.remote.path().join("index.csv"), b"a,b,c\n1,2,3\n").unwrap();

        let report = h.run();
        assert_eq!(report.summary.files_downloaded, 1);
        assert_eq!(report.summary.files_skipped, 4);
        assert_eq!(
            std::fs::read(h.local.path().join("index.csv")).unwrap(),
            b"a,b,c\n1,2,3\n"
        );
    }

    #[test]
    fn cancellation_after_first_item_stops_the_run() {
        let h = Harness::new();
        let context = Arc::clone(&h.context);
        h.client.on_fetch(move |_| {
            context.cancel();
        });

        let report = h.run();
        assert_eq!(h.fetched_names(), vec!["2024-06"]);
        assert!(report.cancelled);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.summary.files_downloaded, 1);
        assert!(h.local.path().join("2024-06/day/log.txt").is_file());
    }

    #[test]
    fn timed_out_item_counts_as_failure_and_run_continues() {
        let h = Harness::new();
        std::fs::remove_dir_all(h.remote.path().join("2023-01")).unwrap();
        std::fs::remove_dir_all(h.remote.path().join("2022-11")).unwrap();
        std::fs::remove_dir_all(h.remote.path().join("2024-06")).unwrap();
        h.client.stall.store(true, Ordering::SeqCst);

        let timeouts = Timeouts {
            file: Duration::from_millis(50),
            grace: Duration::from_millis(200),
            ..Timeouts::default()
        };
        let report = h.run_with(false, timeouts);
        assert_eq!(h.client.fetches().len(), 2);
        assert_eq!(report.summary.files_failed, 2);
        assert_eq!(report.summary.files_downloaded, 0);
        assert!(!report.cancelled);
    }

    #[test]
    fn listing_failure_finishes_cleanly() {
        let h = Harness::new();
        h.client.fail_listing.store(true, Ordering::SeqCst);
        let report = h.run();
        assert_eq!(report.summary.files_downloaded, 0);
        assert_eq!(report.summary.files_skipped, 0);
        assert!(!report.cancelled);
        let points = h.sink.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement(), SUMMARY_MEASUREMENT);
    }

    #[test]
    fn metrics_per_download_and_summary() {
        let h = Harness::new();
        h.run();
        let points = h.sink.points();
        assert_eq!(points.len(), 6);

        let first = &points[0];
        assert_eq!(first.measurement(), DOWNLOAD_MEASUREMENT);
        assert_eq!(first.tag_value("type"), Some("directory"));
        assert_eq!(first.tag_value("item"), Some("2024-06"));
        assert_eq!(first.tag_value("server"), Some("sftp.example.com"));
        assert_eq!(first.field_value("bytes"), Some(7.0));

        let files: Vec<_> = points[3..5]
            .iter()
            .map(|p| p.tag_value("type"))
            .collect();
        assert_eq!(files, vec![Some("file"), Some("file")]);

        let summary = &points[5];
        assert_eq!(summary.measurement(), SUMMARY_MEASUREMENT);
        assert_eq!(summary.field_value("files_downloaded"), Some(5.0));
        assert_eq!(summary.field_value("bytes_downloaded"), Some(32.0));
    }
}
