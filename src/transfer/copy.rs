//! Chunked stream copy that stops between chunks when asked to.
//!
//! A destination that already holds a prefix of the source is appended
//! to, so an interrupted copy can be continued by the next run.

use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use crate::error::MirrorError;

use super::control::TransferControl;
use super::resume::ResumePlan;

/// Read size per chunk; the stop handle is consulted between chunks.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Copy `reader` into `writer` until EOF, checking `control` between chunks.
///
/// Returns the number of bytes copied.
pub fn copy_controlled<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    control: &TransferControl,
) -> Result<u64, MirrorError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        control.checkpoint()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // A forced stop surfaces as an I/O error on the cut socket.
                control.checkpoint()?;
                return Err(e.into());
            }
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    writer.flush()?;
    Ok(copied)
}

/// Fetch one file into `dest`, continuing a partial local copy.
///
/// `open_remote` receives the byte offset to start reading from and returns
/// a reader positioned there. Parent directories of `dest` are created.
/// Returns the final size of the local file.
pub fn fetch_resumable<R, F>(
    open_remote: F,
    remote_len: u64,
    dest: &Path,
    control: &TransferControl,
) -> Result<u64, MirrorError>
where
    R: Read,
    F: FnOnce(u64) -> Result<R, MirrorError>,
{
    control.checkpoint()?;
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let plan = ResumePlan::for_destination(dest, remote_len);
    if plan == ResumePlan::Complete {
        tracing::debug!(dest = %dest.display(), "Local copy already complete");
        return Ok(remote_len);
    }
    if let ResumePlan::Continue(offset) = plan {
        tracing::debug!(dest = %dest.display(), offset, "Continuing partial download");
    }

    let mut reader = open_remote(plan.offset())?;
    let file = plan.open_destination(dest)?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    copy_controlled(&mut reader, &mut writer, control)?;
    drop(writer);

    Ok(std::fs::metadata(dest)?.len())
}
