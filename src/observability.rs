// Centralized Observability Infrastructure
// Structured logging setup shared by the binary and the test harness.
// Every warn/error in the crate carries a `component` field so log streams
// from the indexing pipeline can be filtered per concern.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Component tags used on log records throughout the crate.
pub mod component {
    pub const INDEX_MGMT: &str = "INDEX MGMT";
    pub const INDEXING: &str = "INDEXING";
    pub const UPDATE_HANDLER: &str = "UPDATE HANDLER";
    pub const DELTA: &str = "DELTA";
    pub const TIKA: &str = "TIKA";
    pub const SEARCH: &str = "SEARCH";
    pub const CONFIG_PARSER: &str = "CONFIG_PARSER";
}

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    // Determine the filter level based on flags
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("semsearch=debug,info")
    } else {
        // Default: show the indexing pipeline's info records, suppress
        // dependency chatter. RUST_LOG overrides.
        EnvFilter::new("semsearch=info,warn")
    };

    // Quiet flag takes precedence over the environment variable
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}
