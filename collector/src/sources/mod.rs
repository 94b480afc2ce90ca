//! Metric sources: lazy producers of [`DataPoint`]s, invoked once per cycle.

mod apiserver;
mod exposition;
mod inventory;
mod openmetrics;
mod transport;

pub use apiserver::ApiserverSource;
pub use inventory::InventorySource;
pub use openmetrics::{
    OpenMetricsSource,
    ScrapeTarget,
};
pub use transport::{
    ApiserverTransport,
    HttpTransport,
    ScrapeTransport,
};

use crate::{
    openmetrics::{
        ExpositionError,
        ParseError,
    },
    points::{
        DataPoint,
        Tags,
    },
    reflector::KubeWatcher,
};
use eyre::Result;
use futures::stream::BoxStream;
use kube_shipper_config::CollectorConfig;
use std::time::Duration;

/// Per-cycle values shared by every source.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub base_tags: Tags,
    /// Stamped into the `interval` field of produced points.
    pub interval_secs: u64,
    /// Budget for one scrape target, streaming included.
    pub scrape_timeout: Duration,
}

impl CycleContext {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            base_tags: config.base_tags.iter().cloned().collect(),
            interval_secs: config.point_interval_secs,
            scrape_timeout: config.scrape_timeout,
        }
    }

    /// Base tags plus `source:<name>`.
    pub fn source_tags(&self, source: &str) -> Tags {
        self.base_tags.clone().with("source", source)
    }
}

impl Default for CycleContext {
    fn default() -> Self {
        Self {
            base_tags: Tags::new(),
            interval_secs: DataPoint::DEFAULT_INTERVAL,
            scrape_timeout: Duration::from_secs(5),
        }
    }
}

pub trait MetricSource: Send {
    /// Value of the `source:` tag on this source's error points.
    fn name(&self) -> &'static str;

    /// Produces this cycle's points. An `Err` item ends the source for the
    /// cycle; the pipeline turns it into a single error point.
    fn collect<'a>(&'a mut self, ctx: &'a CycleContext) -> BoxStream<'a, Result<DataPoint, SourceError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(eyre::Report),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unexpected data: {0}")]
    Data(String),
    #[error("{0} cache is not synced yet")]
    NotReady(&'static str),
    #[error("internal error: {0}")]
    Internal(eyre::Report),
}

impl SourceError {
    /// Stable value of the `error:` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::HttpStatus(_) => "http_status",
            Self::Parse(_) => "parse",
            Self::Data(_) => "data",
            Self::NotReady(_) => "not_ready",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ExpositionError> for SourceError {
    fn from(err: ExpositionError) -> Self {
        match err {
            ExpositionError::Io(err) => Self::Transport(err.into()),
            ExpositionError::Parse(err) => Self::Parse(err),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::HttpStatus(status.as_u16()),
            None => Self::Transport(err.into()),
        }
    }
}

impl From<kube::Error> for SourceError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(status) => Self::HttpStatus(status.code),
            err => Self::Transport(err.into()),
        }
    }
}

/// Builds the enabled sources in a fixed order: inventory, apiserver,
/// openmetrics.
pub fn from_config(
    config: &CollectorConfig,
    client: kube::Client,
    watcher: &KubeWatcher,
) -> Result<Vec<Box<dyn MetricSource>>> {
    let mut sources: Vec<Box<dyn MetricSource>> = Vec::new();
    if config.sources.inventory.enabled {
        sources.push(Box::new(InventorySource::new(watcher.caches())));
    }
    if config.sources.apiserver.enabled {
        sources.push(Box::new(ApiserverSource::new(client.clone())));
    }
    if config.sources.openmetrics.enabled {
        sources.push(Box::new(OpenMetricsSource::new(
            &config.sources.openmetrics,
            client,
            watcher.pods.clone(),
        )?));
    }
    info!(
        sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "Configured metric sources"
    );
    Ok(sources)
}
