use super::SourceError;
use crate::openmetrics::{
    chunked_body,
    BoxedBody,
};
use futures::future::BoxFuture;

/// Opens the body of one exposition endpoint.
pub trait ScrapeTransport: Send + Sync {
    /// `location` is whatever the transport addresses endpoints by: an
    /// absolute URL, or a path on the API server.
    fn open<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<BoxedBody, SourceError>>;
}

/// Plain HTTP straight to the endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> eyre::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }
}

impl ScrapeTransport for HttpTransport {
    fn open<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<BoxedBody, SourceError>> {
        Box::pin(async move {
            let response = self.http.get(location).send().await?.error_for_status()?;
            Ok(chunked_body(response.bytes_stream()))
        })
    }
}

/// GET through the API server with the cluster client's credentials.
pub struct ApiserverTransport {
    client: kube::Client,
}

impl ApiserverTransport {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

impl ScrapeTransport for ApiserverTransport {
    fn open<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<BoxedBody, SourceError>> {
        Box::pin(async move {
            let request = http::Request::get(location)
                .body(Vec::new())
                .map_err(|err| SourceError::Internal(err.into()))?;
            let body: BoxedBody = Box::pin(self.client.request_stream(request).await?);
            Ok(body)
        })
    }
}
