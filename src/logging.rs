use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber, writing to stderr so JSON on stdout stays
/// clean. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) -> Result<(), String> {
    let default_filter = format!("nestegg={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| format!("failed to initialise logging: {e}"))?;

    tracing::debug!(level, "logging initialised");
    Ok(())
}
