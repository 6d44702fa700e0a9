use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use clap::Parser;

mod backend;
mod cli;
mod config;
mod error;
mod logging;
mod metrics;
mod mirror;
mod transfer;

use backend::sftp::{SftpClient, SftpSettings};
use cli::args::Cli;
use config::paths::{load_config_file, resolve_config};
use config::types::{Credentials, Verbosity};
use error::MirrorError;
use metrics::sink::UnixSocketSink;
use mirror::context::RunContext;
use mirror::execute_mirror;
use mirror::scheduler::RunReport;

fn main() {
    let cli = Cli::parse();

    // Credentials are checked before anything else touches the network.
    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(err) => {
            display_error(&err);
            std::process::exit(1);
        }
    };

    logging::init(Verbosity::from((cli.quiet, cli.verbose)));

    let code = match run(&cli, credentials) {
        Ok(report) => report.exit_code(),
        Err(err) => {
            tracing::error!("Fatal error: {}", err);
            if let Some(suggestion) = err.suggestion() {
                tracing::info!("hint: {}", suggestion);
            }
            1
        }
    };
    std::process::exit(code);
}

/// Resolve configuration, install the signal handler and run one pass.
fn run(cli: &Cli, credentials: Credentials) -> Result<RunReport, MirrorError> {
    let file = load_config_file(cli.config.as_deref())?;
    let config = resolve_config(cli, file, credentials);
    tracing::debug!(
        jobs = config.jobs,
        force_all = config.force_all,
        metrics_socket = %config.metrics_socket.display(),
        "Configuration resolved"
    );

    let context = Arc::new(RunContext::new(config.timeouts.grace));
    install_signal_handler(Arc::clone(&context))?;

    let client = Arc::new(SftpClient::new(SftpSettings::from_config(&config)));
    let sink = Arc::new(UnixSocketSink::new(&config.metrics_socket));

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        execute_mirror(&config, client, sink, Arc::clone(&context))
    }));
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(MirrorError::TransferFailed {
            item: config.remote_root.display().to_string(),
            reason: "mirror run panicked".to_string(),
        }),
    };

    match &result {
        Ok(report) if report.cancelled => tracing::warn!("Mirror stopped by signal"),
        Ok(_) => {}
        Err(_) => context.stop_current(),
    }
    result
}

/// SIGINT and SIGTERM: refuse new work and stop the in-flight transfer.
fn install_signal_handler(context: Arc<RunContext>) -> Result<(), MirrorError> {
    ctrlc::set_handler(move || {
        if context.cancel() {
            tracing::warn!("Termination requested, stopping current transfer");
            context.stop_current();
        }
    })
    .map_err(|e| MirrorError::Config(format!("Cannot install signal handler: {}", e)))
}

/// Display a MirrorError with optional suggestion hint to stderr.
fn display_error(err: &MirrorError) {
    eprintln!("error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  hint: {}", suggestion);
    }
}
