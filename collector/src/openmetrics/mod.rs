//! Parser for the line-oriented metrics exposition format (Prometheus text /
//! OpenMetrics).
//!
//! [`FamilyParser`] is the synchronous line state machine; [`FamilyStream`]
//! drives it from an async byte stream and hands out one [`MetricFamily`] at
//! a time, as soon as the family is complete.

mod parser;
mod reader;

pub use parser::FamilyParser;
pub use reader::{
    chunked_body,
    BoxedBody,
    FamilyStream,
};
use serde::Serialize;
use std::collections::BTreeMap;
use strum::{
    Display,
    EnumString,
};

#[derive(Debug, Clone, Copy, Default, Display, EnumString, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricType {
    Counter,
    Gauge,
    Summary,
    Histogram,
    #[default]
    Unknown,
}

impl MetricType {
    /// Unrecognized type words (`untyped`, `info`, `stateset`, ...) map to
    /// [`MetricType::Unknown`].
    pub fn from_type_word(word: &str) -> Self {
        word.trim().parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub unit: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// In source order.
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Sample {
    /// Suffix after the family name (`bucket`, `sum`, `total`, ...), empty on
    /// an exact match.
    pub submetric: String,
    /// Label pairs as encountered, duplicates included.
    pub labels: Vec<(String, String)>,
    /// Label lookup; a repeated key keeps its last value.
    pub facets: BTreeMap<String, String>,
    /// Exact text between the braces, empty without labels.
    pub label_text: String,
    pub value: f64,
    /// Exact source text of the value.
    pub raw_value: String,
    pub timestamp: Option<String>,
}

impl Sample {
    pub fn facet(&self, key: &str) -> Option<&str> {
        self.facets.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("line {line}: {reason}: {text:?}")]
pub struct ParseError {
    pub line: usize,
    pub reason: ParseErrorReason,
    pub text: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ParseErrorReason {
    #[error("unrecognized directive `# {0}`")]
    UnknownDirective(String),
    #[error("directive is missing a metric name")]
    MissingDirectiveName,
    #[error("sample line does not match `name{{labels}} value`")]
    MalformedSample,
    #[error("malformed label set: {0}")]
    MalformedLabels(&'static str),
    #[error("invalid sample value `{0}`")]
    InvalidValue(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExpositionError {
    #[error("failed to read exposition stream: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Parses a complete, in-memory exposition body.
pub fn parse_families(text: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut parser = FamilyParser::new();
    let mut families = Vec::new();
    for line in text.lines() {
        families.extend(parser.push_line(line)?);
    }
    families.extend(parser.finish());
    Ok(families)
}
