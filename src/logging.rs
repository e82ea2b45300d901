use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber.
///
/// `level` is an `EnvFilter` directive string (e.g. `"info"` or `"cdp_relay=debug,warn"`). Falls
/// back to `info` if it fails to parse.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
