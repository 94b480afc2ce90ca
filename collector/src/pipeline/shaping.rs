use crate::points::{
    DataPoint,
    PointType,
};
use futures::{
    stream::BoxStream,
    Stream,
    StreamExt as _,
};

/// Zero-valued counts are no-op deltas. Gauges and checks always pass.
pub fn keep_point(point: &DataPoint) -> bool {
    match point.point_type {
        PointType::Count => point.points.iter().any(|p| p.value != 0.0),
        PointType::Gauge | PointType::Check => true,
    }
}

/// Groups points into batches of `size` in arrival order; the last batch
/// holds the remainder.
pub fn batches<'a>(points: impl Stream<Item = DataPoint> + Send + 'a, size: usize) -> BoxStream<'a, Vec<DataPoint>> {
    points.chunks(size.max(1)).boxed()
}
