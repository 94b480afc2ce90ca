//! One collection cycle across every configured source.

mod schedule;
mod shaping;

pub use schedule::FixedInterval;
pub use shaping::{
    batches,
    keep_point,
};

use crate::{
    points::{
        DataPoint,
        DUTY_CYCLE_METRIC,
    },
    sources::{
        CycleContext,
        MetricSource,
    },
};
use futures::{
    stream::{
        self,
        BoxStream,
    },
    StreamExt as _,
};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
};
use tokio::time::Instant;

/// Kind tag of the error point produced for a panicking source.
pub const PANIC_KIND: &str = "panic";

pub struct Pipeline {
    sources: Vec<Box<dyn MetricSource>>,
    context: CycleContext,
}

impl Pipeline {
    pub fn new(sources: Vec<Box<dyn MetricSource>>, context: CycleContext) -> Self {
        Self { sources, context }
    }

    pub fn context(&self) -> &CycleContext {
        &self.context
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    /// The duty cycle gauge, then every source in order. Nothing runs until
    /// the stream is polled. A failing source contributes one error point and
    /// stops; the others are unaffected.
    pub fn run_cycle(&mut self, duty_cycle: f64) -> BoxStream<'_, DataPoint> {
        let context = &self.context;
        let duty = DataPoint::gauge(DUTY_CYCLE_METRIC, duty_cycle * 100.0, context.base_tags.clone())
            .with_interval(context.interval_secs);

        let sources = stream::iter(self.sources.iter_mut()).flat_map(move |source| guarded(source.as_mut(), context));
        stream::once(async move { duty }).chain(sources).boxed()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Runs one source, turning its first error or panic into an error point
/// tagged `source:<name>` and `error:<kind>`.
fn guarded<'a, S>(source: &'a mut S, ctx: &'a CycleContext) -> BoxStream<'a, DataPoint>
where
    S: MetricSource + ?Sized,
{
    let name = source.name();
    async_stream::stream! {
        let started = Instant::now();
        let mut emitted = 0usize;

        // `collect` itself runs on first poll, so a panic building the
        // stream is caught the same way as one while streaming
        let points = stream::once(async move { source.collect(ctx) }).flatten();
        let mut points = AssertUnwindSafe(points).catch_unwind().boxed();

        while let Some(item) = points.next().await {
            match item {
                Ok(Ok(point)) => {
                    emitted += 1;
                    yield point;
                }
                Ok(Err(err)) => {
                    warn!(source = name, kind = err.kind(), %err, "Source failed");
                    yield DataPoint::loop_error(err.kind(), ctx.source_tags(name));
                    break;
                }
                Err(payload) => {
                    error!(source = name, panic = panic_message(&*payload), "Source panicked");
                    yield DataPoint::loop_error(PANIC_KIND, ctx.source_tags(name));
                    break;
                }
            }
        }

        debug!(source = name, emitted, elapsed = ?started.elapsed(), "Source done");
    }
    .boxed()
}
