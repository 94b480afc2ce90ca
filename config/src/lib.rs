#[macro_use]
extern crate tracing;

mod app_config;
mod sources_config;

pub use app_config::get_config_dir;
use color_eyre::Result;
use eyre::{
    bail,
    Context as _,
};
use serde::{
    Deserialize,
    Serialize,
};
pub use sources_config::{
    ApiserverSourceConfig,
    InventorySourceConfig,
    LabelSelector,
    OpenMetricsSourceConfig,
    SourcesConfig,
};
use std::{
    path::Path,
    time::Duration,
};
use strum::{
    Display,
    EnumString,
};

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");
const ENV_PREFIX: &str = "KUBE_SHIPPER";

/// Static configuration consumed by the collector.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CollectorConfig {
    /// Tags added to every emitted point, e.g. `cluster:prod`.
    #[serde(default)]
    pub base_tags: Vec<String>,
    #[serde(with = "humantime_duration")]
    pub tick_interval: Duration,
    pub batch_size: usize,
    #[serde(with = "humantime_duration")]
    pub scrape_timeout: Duration,
    /// Value stamped into the `interval` field of every point.
    pub point_interval_secs: u64,
    #[serde(with = "humantime_duration")]
    pub sync_timeout: Duration,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
}

#[derive(Debug, Default, Clone, Copy, Display, EnumString, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SinkKind {
    /// Logs a summary of each batch, every point at trace level.
    #[default]
    Log,
    /// Writes one JSON document per point to stdout.
    Stdout,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl CollectorConfig {
    /// Loads the layered configuration: embedded defaults, then the config
    /// file (explicit path, or `config.yaml` in the config directory), then
    /// `KUBE_SHIPPER_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = match path {
            Some(path) => {
                debug!(?path, "Loading configuration file");
                Self::defaults_builder()?.add_source(config::File::from(path).format(config::FileFormat::Yaml))
            }
            None => {
                let path = get_config_dir().join("config.yaml");
                debug!(?path, "Looking for optional configuration file");
                Self::defaults_builder()?.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Yaml)
                        .required(false),
                )
            }
        };

        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("base_tags")
                .try_parsing(true),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Failed to assemble configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn defaults_builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(config::Config::builder().add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.tick_interval.is_zero() {
            bail!("tick_interval must be greater than zero");
        }
        if self.scrape_timeout.is_zero() {
            bail!("scrape_timeout must be greater than zero");
        }
        if self.point_interval_secs == 0 {
            bail!("point_interval_secs must be greater than zero");
        }
        if self.sources.openmetrics.enabled {
            self.sources
                .openmetrics
                .pod_label
                .parse::<LabelSelector>()
                .context("sources.openmetrics.pod_label")?;
        }
        Ok(())
    }
}

/// Durations are written the humantime way (`30s`, `1m 30s`).
mod humantime_duration {
    use serde::{
        de::Error as _,
        Deserialize,
        Deserializer,
        Serializer,
    };
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(|e| D::Error::custom(format!("invalid duration {raw:?}: {e}")))
    }
}
