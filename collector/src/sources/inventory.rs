use super::{
    CycleContext,
    MetricSource,
    SourceError,
};
use crate::{
    points::{
        CheckStatus,
        DataPoint,
    },
    reflector::CacheStatus,
};
use futures::{
    stream::{
        self,
        BoxStream,
    },
    StreamExt as _,
};
use std::sync::Arc;

pub const OBJECTS_METRIC: &str = "kube.watcher.objects";
pub const SYNCED_CHECK: &str = "kube.watcher.synced";

/// Reports the size and sync state of every cluster cache.
pub struct InventorySource {
    caches: Vec<Arc<dyn CacheStatus>>,
}

impl InventorySource {
    pub fn new(caches: Vec<Arc<dyn CacheStatus>>) -> Self {
        Self { caches }
    }
}

impl MetricSource for InventorySource {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn collect<'a>(&'a mut self, ctx: &'a CycleContext) -> BoxStream<'a, Result<DataPoint, SourceError>> {
        let points = self.caches.iter().flat_map(|cache| {
            let tags = ctx.base_tags.clone().with("kube_kind", cache.kind());
            let status = match cache.is_synced() {
                true => CheckStatus::Ok,
                false => CheckStatus::Critical,
            };
            [
                DataPoint::gauge(OBJECTS_METRIC, cache.cached_len() as f64, tags.clone()),
                DataPoint::check(SYNCED_CHECK, status, tags),
            ]
            .map(|point| Ok(point.with_interval(ctx.interval_secs)))
        });
        stream::iter(points.collect::<Vec<_>>()).boxed()
    }
}
