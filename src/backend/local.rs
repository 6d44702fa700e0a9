//! Local-filesystem `RemoteClient` used by the engine tests.
//!
//! Remote paths are plain local paths, so a temp directory stands in for
//! the server. Knobs let tests make listings or size queries fail, make a
//! fetch hang until it is stopped, and observe every call.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use walkdir::WalkDir;

use crate::backend::{
    finish_directory_fetch, DirectoryFetch, EntryKind, FileTask, RemoteClient, RemoteEntry,
};
use crate::error::MirrorError;
use crate::transfer::control::TransferControl;
use crate::transfer::copy::fetch_resumable;
use crate::transfer::pool::run_pool;

type FetchHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct LocalTreeClient {
    pub fail_listing: AtomicBool,
    pub fail_disk_usage: AtomicBool,
    pub fail_file_size: AtomicBool,
    /// Fetches block until their control is stopped.
    pub stall: AtomicBool,
    pub size_queries: AtomicUsize,
    fetches: Mutex<Vec<String>>,
    on_fetch: Mutex<Option<FetchHook>>,
}

impl LocalTreeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` with the remote path at the start of every fetch.
    pub fn on_fetch(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_fetch.lock().unwrap() = Some(Box::new(hook));
    }

    /// Remote paths fetched so far, in call order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn size_queries(&self) -> usize {
        self.size_queries.load(Ordering::SeqCst)
    }

    fn begin_fetch(&self, remote: &Path, control: &TransferControl) -> Result<(), MirrorError> {
        let name = remote.display().to_string();
        self.fetches.lock().unwrap().push(name.clone());
        if let Some(hook) = self.on_fetch.lock().unwrap().as_ref() {
            hook(&name);
        }
        if self.stall.load(Ordering::SeqCst) {
            loop {
                control.checkpoint()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }

    fn copy_file(remote: &Path, local: &Path, control: &TransferControl) -> Result<u64, MirrorError> {
        let remote_len = std::fs::metadata(remote)?.len();
        fetch_resumable(
            |offset| {
                let mut file = File::open(remote)?;
                file.seek(SeekFrom::Start(offset))?;
                Ok(file)
            },
            remote_len,
            local,
            control,
        )
    }

    fn unavailable(path: &Path, what: &str) -> MirrorError {
        MirrorError::Remote {
            path: path.to_path_buf(),
            reason: format!("{} unavailable", what),
        }
    }
}

impl RemoteClient for LocalTreeClient {
    fn read_dir(&self, path: &Path) -> Result<Vec<RemoteEntry>, MirrorError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::unavailable(path, "listing"));
        }
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let kind = if entry.path().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(RemoteEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind,
            ));
        }
        Ok(entries)
    }

    fn disk_usage(&self, path: &Path) -> Result<u64, MirrorError> {
        self.size_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_disk_usage.load(Ordering::SeqCst) {
            return Err(Self::unavailable(path, "recursive size"));
        }
        let mut total = 0;
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if entry.file_type().is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn file_size(&self, path: &Path) -> Result<u64, MirrorError> {
        self.size_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_file_size.load(Ordering::SeqCst) {
            return Err(Self::unavailable(path, "size"));
        }
        Ok(std::fs::metadata(path)?.len())
    }

    fn fetch_file(
        &self,
        remote: &Path,
        local: &Path,
        control: &TransferControl,
    ) -> Result<u64, MirrorError> {
        self.begin_fetch(remote, control)?;
        Self::copy_file(remote, local, control)
    }

    fn fetch_dir(
        &self,
        remote: &Path,
        local: &Path,
        jobs: usize,
        control: &TransferControl,
    ) -> Result<DirectoryFetch, MirrorError> {
        self.begin_fetch(remote, control)?;

        let mut tasks = Vec::new();
        for entry in WalkDir::new(remote) {
            let entry = entry?;
            let relative = entry.path().strip_prefix(remote).unwrap_or(entry.path());
            let target = local.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                tasks.push(FileTask {
                    remote: entry.path().to_path_buf(),
                    local: target,
                });
            }
        }

        let report = run_pool(
            tasks,
            jobs,
            control,
            || Ok(()),
            |_, task| Self::copy_file(&task.remote, &task.local, control),
        );
        finish_directory_fetch(remote, report, control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StopReason;
    use std::sync::Arc;

    #[test]
    fn fetch_dir_copies_nested_tree() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(remote.path().join("a/b")).unwrap();
        std::fs::write(remote.path().join("a/one.txt"), b"1").unwrap();
        std::fs::write(remote.path().join("a/b/two.txt"), b"22").unwrap();

        let client = LocalTreeClient::new();
        let control = TransferControl::new();
        let fetch = client
            .fetch_dir(&remote.path().join("a"), &local.path().join("a"), 2, &control)
            .unwrap();

        assert_eq!(fetch, DirectoryFetch { files: 2, bytes: 3 });
        assert_eq!(std::fs::read(local.path().join("a/b/two.txt")).unwrap(), b"22");
        assert_eq!(client.disk_usage(&remote.path().join("a")).unwrap(), 3);
        assert_eq!(client.size_queries(), 1);
    }

    #[test]
    fn stalled_fetch_returns_after_stop() {
        let remote = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("f"), b"x").unwrap();
        let client = Arc::new(LocalTreeClient::new());
        client.stall.store(true, Ordering::SeqCst);
        let control = Arc::new(TransferControl::new());

        let handle = {
            let (client, control) = (Arc::clone(&client), Arc::clone(&control));
            let src = remote.path().join("f");
            let dst = remote.path().join("copy");
            std::thread::spawn(move || client.fetch_file(&src, &dst, &control))
        };
        std::thread::sleep(Duration::from_millis(20));
        control.request_stop(StopReason::TimedOut);

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(MirrorError::Stopped(StopReason::TimedOut))));
        assert_eq!(client.fetches().len(), 1);
    }
}
