//! Helpers shared by the sources that scrape exposition endpoints.

use super::SourceError;
use crate::{
    delta::MonotonicMemory,
    openmetrics::{
        MetricFamily,
        Sample,
    },
    points::{
        DataPoint,
        Tags,
    },
};
use std::{
    future::Future,
    time::Duration,
};
use tokio::time::Instant;

/// Time one scrape may spend waiting on its endpoint. Only awaited steps are
/// charged: while a produced point is with the consumer the clock is off.
pub(super) struct ScrapeBudget {
    timeout: Duration,
    remaining: Duration,
}

impl ScrapeBudget {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            remaining: timeout,
        }
    }

    /// Awaits `step` unless the rest of the budget runs out first.
    pub async fn step<T, E>(&mut self, step: impl Future<Output = Result<T, E>>) -> Result<T, SourceError>
    where
        E: Into<SourceError>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.remaining, step).await;
        self.remaining = self.remaining.saturating_sub(started.elapsed());
        match result {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(SourceError::Timeout(self.timeout)),
        }
    }
}

/// `foo_bar_seconds` with unit `seconds` becomes `om.foo.bar_seconds` then
/// `om.foo.bar.seconds`.
pub(super) fn om_metric_name(family: &MetricFamily) -> String {
    let mut name = format!("om.{}", family.name.replacen('_', ".", 1));
    if let Some(unit) = family.unit.as_deref().filter(|unit| !unit.is_empty()) {
        if let Some(stem) = name.strip_suffix(&format!("_{unit}")) {
            name = format!("{stem}.{unit}");
        }
    }
    name
}

/// `<scope>!<family>!<submetric>!<label text>`, with the scope omitted when
/// empty.
pub(super) fn delta_key(scope: &str, family: &MetricFamily, sample: &Sample) -> String {
    if scope.is_empty() {
        format!("{}!{}!{}", family.name, sample.submetric, sample.label_text)
    } else {
        format!("{scope}!{}!{}!{}", family.name, sample.submetric, sample.label_text)
    }
}

/// `tags` plus one `om_<key>:<value>` tag per sample label.
pub(super) fn sample_tags(tags: &Tags, sample: &Sample) -> Tags {
    let mut tags = tags.clone();
    for (key, value) in &sample.labels {
        tags.push(&format!("om_{key}"), value);
    }
    tags
}

/// Appends `.<submetric>` when there is one.
pub(super) fn with_submetric(name: &str, sample: &Sample) -> String {
    if sample.submetric.is_empty() {
        name.to_string()
    } else {
        format!("{name}.{}", sample.submetric)
    }
}

pub(super) fn report_gauge(name: String, sample: &Sample, tags: Tags, interval: u64) -> DataPoint {
    DataPoint::gauge(name, sample.value, tags).with_interval(interval)
}

/// Feeds the cumulative reading through `memory`; a point only comes out
/// once there is a baseline and the counter did not reset.
pub(super) fn report_count(
    memory: &mut MonotonicMemory,
    key: &str,
    name: String,
    sample: &Sample,
    tags: Tags,
    interval: u64,
) -> Option<DataPoint> {
    let delta = memory.observe(key, sample.value)?;
    Some(DataPoint::count(name, delta, tags).with_interval(interval))
}
