use crate::{
    pipeline::{
        batches,
        keep_point,
        FixedInterval,
        Pipeline,
    },
    sink::MetricSink,
};
use futures::{
    future,
    StreamExt as _,
};
use tokio::time::Instant;

/// What one cycle produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Points handed to the sink, error points included.
    pub emitted: usize,
    /// Zero-valued counts filtered out.
    pub dropped: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Error points among the emitted ones.
    pub errors: usize,
}

/// Drives the pipeline on a fixed tick and feeds the sink.
pub struct Collector {
    pipeline: Pipeline,
    sink: Box<dyn MetricSink>,
    schedule: FixedInterval,
    batch_size: usize,
}

impl Collector {
    pub fn new(pipeline: Pipeline, sink: Box<dyn MetricSink>, schedule: FixedInterval, batch_size: usize) -> Self {
        Self {
            pipeline,
            sink,
            schedule,
            batch_size,
        }
    }

    /// Runs cycles forever; the first one starts right away.
    pub async fn run(&mut self) {
        info!(
            period = ?self.schedule.period(),
            sources = ?self.pipeline.source_names(),
            sink = self.sink.name(),
            "Starting collection loop"
        );
        loop {
            let duty_cycle = self.schedule.tick().await;
            if duty_cycle > 1.0 {
                warn!(duty_cycle, "Previous cycle overran the tick");
            }
            self.run_once(duty_cycle).await;
        }
    }

    /// One full cycle: collect, drop no-op counts, batch and submit. Sink
    /// failures are logged and the cycle carries on with the next batch.
    pub async fn run_once(&mut self, duty_cycle: f64) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let mut dropped = 0;

        let kept = self.pipeline.run_cycle(duty_cycle).filter(|point| {
            let keep = keep_point(point);
            if !keep {
                dropped += 1;
            }
            future::ready(keep)
        });
        let mut batched = batches(kept, self.batch_size);

        while let Some(batch) = batched.next().await {
            report.batches += 1;
            report.emitted += batch.len();
            report.errors += batch.iter().filter(|point| point.is_loop_error()).count();
            if let Err(err) = self.sink.submit(&batch).await {
                report.failed_batches += 1;
                error!(sink = self.sink.name(), points = batch.len(), ?err, "Failed to submit batch");
            }
        }
        drop(batched);
        report.dropped = dropped;

        info!(
            duty_cycle,
            emitted = report.emitted,
            dropped = report.dropped,
            batches = report.batches,
            errors = report.errors,
            elapsed = ?started.elapsed(),
            "Cycle done"
        );
        report
    }
}
