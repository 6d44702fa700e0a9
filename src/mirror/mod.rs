//! The mirroring engine.
//!
//! `execute_mirror` lists the remote root, compares sizes with the local
//! tree and fetches whatever differs. Directories go first (newest name
//! first), then files; parallelism lives inside each directory fetch.

pub mod catalog;
pub mod context;
pub mod diff;
pub mod executor;
pub mod local;
pub mod scheduler;
pub mod stats;

use std::sync::Arc;

use crate::backend::RemoteClient;
use crate::config::types::MirrorConfig;
use crate::error::MirrorError;
use crate::metrics::sink::MetricsSink;

use catalog::RemoteCatalog;
use context::RunContext;
use scheduler::{MirrorScheduler, RunReport};

/// Run one mirror pass.
///
/// Only a local root that cannot be created is an error; remote trouble is
/// logged per item and reflected in the report.
pub fn execute_mirror(
    config: &MirrorConfig,
    client: Arc<dyn RemoteClient>,
    sink: Arc<dyn MetricsSink>,
    context: Arc<RunContext>,
) -> Result<RunReport, MirrorError> {
    std::fs::create_dir_all(&config.local_root).map_err(|e| {
        MirrorError::Config(format!(
            "Cannot create local destination {}: {}",
            config.local_root.display(),
            e
        ))
    })?;

    let catalog = RemoteCatalog::new(client, config.remote_root.clone());
    Ok(MirrorScheduler::new(config, catalog, sink, context).run())
}
