use futures::stream::BoxStream;
use std::{
    future::Future,
    pin::Pin,
};

/// Stable identity and change cursor of a watched object.
pub trait Identity {
    /// `namespace/name`, or `name` for cluster-scoped objects.
    fn key(&self) -> String;

    fn resource_version(&self) -> Option<&str>;
}

/// A full collection plus the cursor to resume watching from.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Advances the cursor without touching any object.
    Bookmark(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The cursor expired on the server; only a fresh list recovers.
    #[error("resource version too old")]
    Gone,
    #[error("list/watch transport failed: {0}")]
    Transport(eyre::Report),
}

pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, WatchError>>;

/// The list/watch half of the cluster API for one resource kind.
pub trait ListWatch<K>: Send + Sync + 'static {
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Listing<K>, WatchError>> + Send + '_>>;

    /// Opens a change stream starting after `resource_version`.
    fn watch(
        &self,
        resource_version: &str,
    ) -> Pin<Box<dyn Future<Output = Result<WatchStream<K>, WatchError>> + Send + '_>>;
}
