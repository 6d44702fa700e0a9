//! Run metrics in line protocol, delivered to a local collector socket.

pub mod line;
pub mod sink;

/// Per-transfer measurement.
pub const DOWNLOAD_MEASUREMENT: &str = "sftp_mirror_download";
/// Run summary measurement.
pub const SUMMARY_MEASUREMENT: &str = "sftp_mirror_summary";
