#![recursion_limit = "256"]
pub mod checkpoint;
pub mod data;
pub mod device;
pub mod error;
pub mod inference;
pub mod labels;
pub mod losses;
pub mod model;
pub mod optim;
pub mod schedule;
pub mod training;
pub mod utils;

/// Install the `tracing` subscriber used by the binaries. `RUST_LOG`
/// overrides the default `info` level.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
