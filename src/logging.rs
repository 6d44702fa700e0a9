//! Tracing setup: severity-prefixed stdout lines plus the systemd journal.

use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::types::Verbosity;

/// Identifier under which entries appear in the journal.
pub const SYSLOG_IDENTIFIER: &str = "sftp_mirror";

/// Renders `[LEVEL] message key=value` without timestamps or targets;
/// the journal adds its own metadata.
pub struct SeverityPrefix;

impl<S, N> FormatEvent<S, N> for SeverityPrefix
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[{}] ", severity_label(event.metadata().level()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub fn severity_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the verbosity flags. A missing journal is not
/// fatal: logging continues on stdout alone.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.as_tracing_filter()));

    let stdout = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(false)
        .event_format(SeverityPrefix);

    let (journald, journald_error) = match tracing_journald::layer() {
        Ok(layer) => (
            Some(layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string())),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(journald)
        .init();

    if let Some(e) = journald_error {
        tracing::warn!("System journal unavailable, logging to stdout only: {}", e);
    }
    tracing::debug!("Verbosity level: {:?}", verbosity);
}
