use eyre::{
    eyre,
    Report,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::str::FromStr;

/// Per-source enable flags and settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SourcesConfig {
    #[serde(default)]
    pub openmetrics: OpenMetricsSourceConfig,
    #[serde(default)]
    pub apiserver: ApiserverSourceConfig,
    #[serde(default)]
    pub inventory: InventorySourceConfig,
}

/// Scraping of pods that opt in through a label and announce their metrics
/// port through an annotation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenMetricsSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `key=value` label a pod must carry to be scraped.
    pub pod_label: String,
    pub port_annotation: String,
    #[serde(default = "default_metrics_path")]
    pub path: String,
    /// Go through the API server's pod proxy instead of dialing the pod IP.
    #[serde(default)]
    pub proxied: bool,
}

impl Default for OpenMetricsSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pod_label: "metrics.kube-shipper.io/scrape=true".to_string(),
            port_annotation: "metrics.kube-shipper.io/port".to_string(),
            path: default_metrics_path(),
            proxied: false,
        }
    }
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiserverSourceConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InventorySourceConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// A single equality label selector, `key=value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl FromStr for LabelSelector {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| eyre!("label selector {s:?} must have the form key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(eyre!("label selector {s:?} has an empty key"));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl LabelSelector {
    pub fn matches<'a>(&self, mut lookup: impl FnMut(&str) -> Option<&'a String>) -> bool {
        lookup(&self.key).is_some_and(|v| *v == self.value)
    }
}
