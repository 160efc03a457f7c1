use tracing_subscriber::EnvFilter;

/// Initialize the process-wide tracing subscriber.
///
/// Filter comes from `RUST_LOG`, falling back to the supplied default
/// (typically "info"). Safe to call more than once; later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
