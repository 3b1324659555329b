use tracing_subscriber::EnvFilter;

/// Install a stderr tracing subscriber unless one is already active.
///
/// `RUST_LOG` wins when set; otherwise the level is `debug` for verbose runs
/// and `warn` for everything else.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
