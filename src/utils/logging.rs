/// Installs the global `tracing` subscriber for the relay.
///
/// `level` comes from `log.level` in the settings; unrecognised names log
/// at `info`. Later calls keep the first subscriber.
pub fn init(level: &str) {
    let max_level = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    // the CLI and every test binary call this; only the first install wins
    let _ = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .try_init();
}
