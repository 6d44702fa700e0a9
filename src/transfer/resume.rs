//! Continuation decision for a file that may already be partly present.
//!
//! Mirrors `get -c` semantics: a shorter local copy is continued from its
//! current length, a complete one is left alone and a longer one (which
//! cannot be a prefix of the remote file) is restarted.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// How to continue a download given what is already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// Nothing usable locally; write from offset 0.
    Fresh,
    /// Local copy is a prefix; append from this offset.
    Continue(u64),
    /// Local copy already has the remote length.
    Complete,
}

impl ResumePlan {
    /// Decide from the local length (if the file exists) and the remote length.
    pub fn decide(local_len: Option<u64>, remote_len: u64) -> Self {
        match local_len {
            None => ResumePlan::Fresh,
            Some(len) if len == remote_len => ResumePlan::Complete,
            Some(len) if len > 0 && len < remote_len => ResumePlan::Continue(len),
            Some(_) => ResumePlan::Fresh,
        }
    }

    /// Look at `dest` and decide. Non-regular files count as absent.
    pub fn for_destination(dest: &Path, remote_len: u64) -> Self {
        let local_len = std::fs::metadata(dest)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len());
        Self::decide(local_len, remote_len)
    }

    /// Byte offset the remote read should start from.
    pub fn offset(&self) -> u64 {
        match self {
            ResumePlan::Continue(offset) => *offset,
            _ => 0,
        }
    }

    /// Open `dest` for writing according to the plan.
    pub fn open_destination(&self, dest: &Path) -> io::Result<File> {
        match self {
            ResumePlan::Continue(_) => OpenOptions::new().append(true).open(dest),
            _ => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(dest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn decide_covers_every_case() {
        assert_eq!(ResumePlan::decide(None, 100), ResumePlan::Fresh);
        assert_eq!(ResumePlan::decide(Some(0), 100), ResumePlan::Fresh);
        assert_eq!(ResumePlan::decide(Some(40), 100), ResumePlan::Continue(40));
        assert_eq!(ResumePlan::decide(Some(100), 100), ResumePlan::Complete);
        assert_eq!(ResumePlan::decide(Some(150), 100), ResumePlan::Fresh);
        assert_eq!(ResumePlan::decide(Some(0), 0), ResumePlan::Complete);
    }

    #[test]
    fn offset_only_for_continue() {
        assert_eq!(ResumePlan::Continue(7).offset(), 7);
        assert_eq!(ResumePlan::Fresh.offset(), 0);
        assert_eq!(ResumePlan::Complete.offset(), 0);
    }

    #[test]
    fn continue_appends_and_fresh_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.bin");
        std::fs::write(&dest, b"abc").unwrap();

        let plan = ResumePlan::for_destination(&dest, 6);
        assert_eq!(plan, ResumePlan::Continue(3));
        let mut file = plan.open_destination(&dest).unwrap();
        file.write_all(b"def").unwrap();
        drop(file);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");

        let plan = ResumePlan::for_destination(&dest, 2);
        assert_eq!(plan, ResumePlan::Fresh);
        let mut file = plan.open_destination(&dest).unwrap();
        file.write_all(b"xy").unwrap();
        drop(file);
        assert_eq!(std::fs::read(&dest).unwrap(), b"xy");
    }

    #[test]
    fn directory_at_destination_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ResumePlan::for_destination(dir.path(), 10),
            ResumePlan::Fresh
        );
    }
}
