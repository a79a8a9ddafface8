//! Process-wide logging setup.
//!
//! Initialized once at startup with explicit configuration; the core
//! keeps no other global mutable state.

use crate::error::Result;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Verbosity: 0 = warn, 1 = info, 2 = debug, 3+ = trace. `RUST_LOG`
/// overrides the computed default.
pub fn init(verbosity: u8) -> Result<()> {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ltfs_format={default},mkltfs={default}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| crate::error::LtfsError::internal(format!("logger init failed: {e}")))?;

    Ok(())
}
