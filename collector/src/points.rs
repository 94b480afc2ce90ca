//! The common emission shape produced by every source and by the pipeline.

use chrono::{
    DateTime,
    Utc,
};
use derive_more::{
    Deref,
    DerefMut,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeSet;
use strum::{
    Display,
    EnumString,
};

/// Name of the synthetic point emitted when a source or scrape target fails.
pub const LOOP_ERROR_METRIC: &str = "app.loop.error";

/// Name of the per-cycle self-observation gauge.
pub const DUTY_CYCLE_METRIC: &str = "app.loop.duty_cycle";

#[derive(Debug, Clone, Copy, Display, EnumString, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PointType {
    Gauge,
    /// A per-interval increment. Zero-valued counts are dropped before submission.
    Count,
    Check,
}

/// Check states, encoded as the point value.
#[derive(Debug, Clone, Copy, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CheckStatus {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A set of `key:value` tags.
#[derive(Debug, Clone, Default, Deref, DerefMut, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.0.insert(format!("{key}:{value}"));
        self
    }

    pub fn push(&mut self, key: &str, value: impl std::fmt::Display) {
        self.0.insert(format!("{key}:{value}"));
    }

    /// Whether the exact `key:value` tag is present.
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.0.contains(&format!("{key}:{value}"))
    }
}

impl<S: Into<String>> FromIterator<S> for Tags {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub name: String,
    pub points: Vec<Point>,
    #[serde(rename = "type")]
    pub point_type: PointType,
    pub tags: Tags,
    /// Seconds covered by one point.
    pub interval: u64,
}

impl DataPoint {
    pub const DEFAULT_INTERVAL: u64 = 30;

    fn single(name: impl Into<String>, point_type: PointType, value: f64, tags: Tags) -> Self {
        Self {
            name: name.into(),
            points: vec![Point { value, timestamp: None }],
            point_type,
            tags,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64, tags: Tags) -> Self {
        Self::single(name, PointType::Gauge, value, tags)
    }

    pub fn count(name: impl Into<String>, value: f64, tags: Tags) -> Self {
        Self::single(name, PointType::Count, value, tags)
    }

    pub fn check(name: impl Into<String>, status: CheckStatus, tags: Tags) -> Self {
        Self::single(name, PointType::Check, status as u8 as f64, tags)
    }

    /// A count of one, tagged `error:<kind>` on top of the given tags.
    pub fn loop_error(kind: &str, tags: Tags) -> Self {
        Self::count(LOOP_ERROR_METRIC, 1.0, tags.with("error", kind)).with_interval(60)
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        for point in &mut self.points {
            point.timestamp = Some(timestamp);
        }
        self
    }

    pub fn value(&self) -> Option<f64> {
        self.points.first().map(|p| p.value)
    }

    pub fn is_loop_error(&self) -> bool {
        self.name == LOOP_ERROR_METRIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loop_error_point_carries_kind() {
        let point = DataPoint::loop_error("timeout", Tags::new().with("source", "apiserver"));
        assert_eq!(point.name, LOOP_ERROR_METRIC);
        assert_eq!(point.point_type, PointType::Count);
        assert_eq!(point.value(), Some(1.0));
        assert!(point.tags.has("source", "apiserver"));
        assert!(point.tags.has("error", "timeout"));
    }

    #[test]
    fn serializes_type_field() {
        let point = DataPoint::check("kube.watcher.synced", CheckStatus::Critical, Tags::from_iter(["a:b"]));
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["type"], "check");
        assert_eq!(json["points"][0]["value"], 2.0);
        assert_eq!(json["tags"], serde_json::json!(["a:b"]));
        assert!(json["points"][0].get("timestamp").is_none());
    }
}
