use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "cvwatch=info";

/// Stderr-only so stdout stays clean for reports and dry-run payloads.
pub fn init() {
    let filter = EnvFilter::try_from_env("CVWATCH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
