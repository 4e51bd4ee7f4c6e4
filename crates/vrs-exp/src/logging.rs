use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count: warnings by default, `-v` for info,
/// `-vv` and above for debug.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// verbosity count; repeated calls keep the first subscriber.
pub fn init_logging(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
