use clap::Parser;
use std::path::PathBuf;

/// Periodic Kubernetes telemetry collector
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (yaml). Defaults to `config.yaml` in the config
    /// directory, if present.
    #[arg(long, short, env = "KUBE_SHIPPER_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Run a single collection cycle and exit.
    #[arg(long)]
    pub once: bool,

    /// Enable debug logging for the collector crates.
    #[arg(short, long)]
    pub verbose: bool,
}
