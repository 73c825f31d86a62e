/// Install a default `tracing` subscriber reading the `RUST_LOG` filter.
///
/// Convenience for applications that don't configure their own subscriber;
/// calling it twice is an error surfaced by the registry.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
