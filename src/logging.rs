use color_eyre::Result;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` for our own crates
/// with `--verbose`.
pub fn init(verbose: bool) -> Result<()> {
    color_eyre::install()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!(
            "info,kube_metrics_shipper={level},kube_shipper_collector={level},kube_shipper_config={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;
    Ok(())
}
