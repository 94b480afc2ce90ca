#[macro_use]
extern crate tracing;

mod args;
mod logging;

use args::Args;
use clap::Parser;
use color_eyre::Result;
use eyre::Context as _;
use kube_shipper_collector::{
    sources,
    Collector,
    CycleContext,
    FixedInterval,
    JsonLinesSink,
    KubeWatcher,
    LogSink,
    MetricSink,
    Pipeline,
};
use kube_shipper_config::{
    CollectorConfig,
    SinkKind,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    let config = CollectorConfig::load(args.config.as_deref())?;
    debug!(?config, "Loaded configuration");

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let watcher = KubeWatcher::new(client.clone());
    watcher.start_all();
    if watcher.wait_synced(config.sync_timeout).await {
        info!("All cluster caches synced");
    } else {
        warn!(timeout = ?config.sync_timeout, "Starting collection before all caches synced");
    }

    let pipeline = Pipeline::new(
        sources::from_config(&config, client, &watcher)?,
        CycleContext::from_config(&config),
    );
    let sink: Box<dyn MetricSink> = match config.sink.kind {
        SinkKind::Log => Box::new(LogSink),
        SinkKind::Stdout => Box::new(JsonLinesSink::stdout()),
    };
    let mut collector = Collector::new(
        pipeline,
        sink,
        FixedInterval::new(config.tick_interval),
        config.batch_size,
    );

    if args.once {
        let report = collector.run_once(0.0).await;
        info!(?report, "Single cycle done");
        return Ok(());
    }

    tokio::select! {
        _ = collector.run() => {},
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    Ok(())
}
