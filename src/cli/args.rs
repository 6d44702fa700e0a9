use std::path::PathBuf;

use clap::Parser;

/// Default unix socket of the local Telegraf listener.
pub const DEFAULT_METRICS_SOCKET: &str = "/run/telegraf/telegraf.sock";

#[derive(Parser, Debug)]
#[command(
    name = "sftp-mirror",
    version,
    about = "Mirror a remote SFTP path to a local destination",
    after_help = "Credentials are read from the SFTP_USERNAME and SFTP_PASSWORD environment variables."
)]
pub struct Cli {
    /// SFTP server (hostname or IP)
    pub server: String,

    /// Remote path to mirror
    pub remote_path: String,

    /// Local destination path
    pub local_path: PathBuf,

    /// Number of parallel download jobs inside a directory transfer
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,

    /// Re-download all files without size comparison
    #[arg(short, long)]
    pub all: bool,

    /// SSH port of the server
    #[arg(short, long, default_value_t = 22)]
    pub port: u16,

    /// Unix socket that receives line-protocol metrics
    #[arg(long, value_name = "PATH")]
    pub metrics_socket: Option<PathBuf>,

    /// TOML config file with timeout overrides
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode: suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}
