use crate::points::DataPoint;
use eyre::{
    Context as _,
    Result,
};
use std::{
    collections::BTreeSet,
    future::Future,
    pin::Pin,
};
use tokio::io::{
    AsyncWrite,
    AsyncWriteExt as _,
};

/// Receives shaped batches at the end of the pipeline.
pub trait MetricSink: Send {
    /// Submit one batch, in arrival order
    fn submit<'a>(&'a mut self, batch: &'a [DataPoint]) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn name(&self) -> &'static str;
}

/// Logs a summary of every batch, and each point at trace level.
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn submit<'a>(&'a mut self, batch: &'a [DataPoint]) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let names: BTreeSet<_> = batch.iter().map(|point| point.name.as_str()).collect();
            info!(points = batch.len(), metrics = names.len(), "Submitting batch");
            for point in batch {
                trace!(
                    name = %point.name,
                    kind = %point.point_type,
                    value = ?point.value(),
                    tags = ?point.tags,
                    "Point"
                );
            }
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// One JSON document per point, newline separated.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> MetricSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn submit<'a>(&'a mut self, batch: &'a [DataPoint]) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut buffer = Vec::new();
            for point in batch {
                serde_json::to_writer(&mut buffer, point).context("failed to serialize point")?;
                buffer.push(b'\n');
            }
            self.writer.write_all(&buffer).await.context("failed to write batch")?;
            self.writer.flush().await.context("failed to flush batch")?;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "jsonlines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::Tags;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn writes_one_line_per_point() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let batch = vec![
            DataPoint::gauge("a.b", 1.5, Tags::new().with("k", "v")),
            DataPoint::count("c", 2.0, Tags::new()).with_interval(60),
        ];
        sink.submit(&batch).await.unwrap();

        let written = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                serde_json::json!({
                    "name": "a.b",
                    "points": [{"value": 1.5}],
                    "type": "gauge",
                    "tags": ["k:v"],
                    "interval": 30,
                }),
                serde_json::json!({
                    "name": "c",
                    "points": [{"value": 2.0}],
                    "type": "count",
                    "tags": [],
                    "interval": 60,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn log_sink_accepts_batches() {
        let mut sink = LogSink;
        sink.submit(&[DataPoint::gauge("a", 1.0, Tags::new())]).await.unwrap();
        assert_eq!(sink.name(), "log");
    }
}
