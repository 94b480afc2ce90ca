use super::{
    ExpositionError,
    FamilyParser,
    MetricFamily,
};
use futures::{
    io::{
        AsyncBufRead,
        AsyncBufReadExt as _,
        Lines,
    },
    stream::{
        self,
        Fuse,
    },
    Stream,
    StreamExt as _,
    TryStreamExt as _,
};
use std::pin::Pin;

/// Type-erased response body, as handed out by both scrape transports.
pub type BoxedBody = Pin<Box<dyn AsyncBufRead + Send>>;

/// Reads families off an exposition byte stream one at a time.
///
/// Only the lines of the family currently being assembled are held in
/// memory. The stream cannot be restarted: once it returned the end or an
/// error, every later call returns `Ok(None)`.
pub struct FamilyStream<R> {
    lines: Fuse<Lines<R>>,
    parser: FamilyParser,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> FamilyStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines().fuse(),
            parser: FamilyParser::new(),
            done: false,
        }
    }

    pub async fn next_family(&mut self) -> Result<Option<MetricFamily>, ExpositionError> {
        if self.done {
            return Ok(None);
        }
        let result = self.read_family().await;
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    async fn read_family(&mut self) -> Result<Option<MetricFamily>, ExpositionError> {
        while let Some(line) = self.lines.next().await {
            if let Some(family) = self.parser.push_line(&line?)? {
                return Ok(Some(family));
            }
        }
        Ok(self.parser.finish())
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<MetricFamily, ExpositionError>> {
        stream::try_unfold(self, |mut families| async move {
            Ok(families.next_family().await?.map(|family| (family, families)))
        })
    }
}

/// Adapts a chunked byte stream, e.g. `reqwest::Response::bytes_stream`.
pub fn chunked_body<S, B, E>(chunks: S) -> BoxedBody
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    Box::pin(chunks.map_err(std::io::Error::other).boxed().into_async_read())
}

impl FamilyStream<BoxedBody> {
    pub fn from_chunks<S, B, E>(chunks: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        Self::new(chunked_body(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openmetrics::{
        MetricType,
        ParseErrorReason,
    };
    use pretty_assertions::assert_eq;

    fn chunked(chunks: &[&'static str]) -> FamilyStream<BoxedBody> {
        FamilyStream::from_chunks(stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, std::io::Error>(c.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn yields_families_across_chunk_boundaries() {
        let mut families = chunked(&["# TYPE a ga", "uge\na 1\n# TY", "PE b counter\nb_total 2", "\n"]);
        let a = families.next_family().await.unwrap().unwrap();
        assert_eq!((a.name.as_str(), a.metric_type), ("a", MetricType::Gauge));
        let b = families.next_family().await.unwrap().unwrap();
        assert_eq!((b.name.as_str(), b.samples[0].submetric.as_str()), ("b", "total"));
        assert!(families.next_family().await.unwrap().is_none());
        assert!(families.next_family().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flushes_unterminated_last_line() {
        let mut families = chunked(&["# TYPE a gauge\na 7"]);
        let a = families.next_family().await.unwrap().unwrap();
        assert_eq!(a.samples[0].value, 7.0);
    }

    #[tokio::test]
    async fn parse_error_ends_stream() {
        let mut families = chunked(&["# TYPE a gauge\na 1\n# TYPE b gauge\nb oops\n# TYPE c gauge\nc 1\n"]);
        assert_eq!(families.next_family().await.unwrap().unwrap().name, "a");
        match families.next_family().await {
            Err(ExpositionError::Parse(err)) => {
                assert_eq!(err.line, 4);
                assert_eq!(err.reason, ParseErrorReason::InvalidValue("oops".to_string()));
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert!(families.next_family().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn io_error_surfaces() {
        let mut families = FamilyStream::from_chunks(stream::iter(vec![
            Ok(b"# TYPE a gauge\na 1\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]));
        assert!(matches!(families.next_family().await, Err(ExpositionError::Io(_))));
    }

    #[tokio::test]
    async fn into_stream_collects() {
        let families: Vec<_> = chunked(&["a 1\nb 2\n"]).into_stream().try_collect().await.unwrap();
        assert_eq!(families.len(), 2);
    }
}
