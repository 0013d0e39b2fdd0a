pub mod coordinator;
pub mod migrate;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use sc_deaddrop::{Deaddrop, LocalBus, RemoteBus};
use sc_domain::error::Error;

use crate::cli::BusArgs;

/// How a command finished, for exit-code mapping.
pub enum RunOutcome {
    Done,
    /// The user hit Ctrl-C.
    Interrupted,
}

/// Resolve the bus adapter from CLI flags. `create_store` allows a fresh
/// local backing file (used by `coordinator create`).
pub fn bus_from_args(args: &BusArgs, create_store: bool) -> anyhow::Result<Arc<dyn Deaddrop>> {
    match (&args.server_url, &args.local_store) {
        (Some(url), None) => Ok(Arc::new(RemoteBus::new(url)?)),
        (None, Some(path)) => {
            let bus = if create_store {
                LocalBus::create(path)?
            } else {
                LocalBus::open(path)?
            };
            Ok(Arc::new(bus))
        }
        _ => Err(Error::Config(
            "exactly one of --server-url / --local-store is required".into(),
        )
        .into()),
    }
}

/// Default per-user coordination state directory.
pub fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".silica")
        .join("coordination")
}
