//! Periodic cluster telemetry: mirrors cluster objects, scrapes exposition
//! endpoints and ships normalized, batched data points.

#[macro_use]
extern crate tracing;

mod cycle;
pub mod delta;
pub mod openmetrics;
pub mod pipeline;
pub mod points;
pub mod reflector;
pub mod sink;
pub mod sources;

pub use cycle::{
    Collector,
    CycleReport,
};
pub use delta::MonotonicMemory;
pub use pipeline::{
    FixedInterval,
    Pipeline,
};
pub use points::{
    CheckStatus,
    DataPoint,
    PointType,
    Tags,
};
pub use reflector::KubeWatcher;
pub use sink::{
    JsonLinesSink,
    LogSink,
    MetricSink,
};
pub use sources::{
    CycleContext,
    MetricSource,
    SourceError,
};
