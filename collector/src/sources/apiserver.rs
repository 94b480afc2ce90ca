use super::{
    exposition::{
        delta_key,
        report_count,
        report_gauge,
        sample_tags,
        ScrapeBudget,
    },
    transport::{
        ApiserverTransport,
        ScrapeTransport,
    },
    CycleContext,
    MetricSource,
    SourceError,
};
use crate::{
    delta::MonotonicMemory,
    openmetrics::{
        BoxedBody,
        FamilyStream,
        MetricFamily,
        Sample,
    },
    points::{
        DataPoint,
        Tags,
    },
};
use futures::{
    stream::BoxStream,
    StreamExt as _,
};

const SOURCE_NAME: &str = "apiserver";
const PREFIX: &str = "kube.apiserver.";
const METRICS_PATH: &str = "/metrics";

/// The API server's own `/metrics`, narrowed to a fixed set of families.
pub struct ApiserverSource {
    transport: Box<dyn ScrapeTransport>,
    memory: MonotonicMemory,
}

impl ApiserverSource {
    pub fn new(client: kube::Client) -> Self {
        Self::with_transport(Box::new(ApiserverTransport::new(client)))
    }

    pub fn with_transport(transport: Box<dyn ScrapeTransport>) -> Self {
        Self {
            transport,
            memory: MonotonicMemory::new(),
        }
    }

    async fn open(&self) -> Result<FamilyStream<BoxedBody>, SourceError> {
        Ok(FamilyStream::new(self.transport.open(METRICS_PATH).await?))
    }
}

/// `pods` -> `pod`, `ingresses` -> `ingress`, `networkpolicies` ->
/// `networkpolicy`.
fn singular(plural: &str) -> String {
    if plural == "endpoints" {
        plural.to_string()
    } else if let Some(stem) = plural.strip_suffix("sses") {
        format!("{stem}ss")
    } else if let Some(stem) = plural.strip_suffix("ies") {
        format!("{stem}y")
    } else {
        plural.strip_suffix('s').unwrap_or(plural).to_string()
    }
}

/// `kube_kind` and `kube_group` from the `resource` and `group` labels.
/// `None` when the sample has no resource.
fn kind_tags(tags: Tags, sample: &Sample) -> Option<Tags> {
    let resource = sample.facet("resource").filter(|r| !r.is_empty())?;
    let group = sample.facet("group").filter(|g| !g.is_empty()).unwrap_or("core");
    Some(tags.with("kube_kind", singular(resource)).with("kube_group", group))
}

/// Storage labels carry `<plural>.<group>` in `resource`, core kinds have no
/// group suffix.
fn storage_kind_tags(tags: Tags, sample: &Sample) -> Option<Tags> {
    let resource = sample.facet("resource").filter(|r| !r.is_empty())?;
    let (plural, group) = match resource.split_once('.') {
        Some((plural, group)) if !plural.is_empty() => (plural, group),
        _ => (resource, "core"),
    };
    Some(tags.with("kube_kind", singular(plural)).with("kube_group", group))
}

pub(crate) fn map_family(memory: &mut MonotonicMemory, family: &MetricFamily, ctx: &CycleContext) -> Vec<DataPoint> {
    let interval = ctx.interval_secs;
    let count = |memory: &mut MonotonicMemory, name: &str, sample: &Sample, tags: Tags| {
        report_count(
            memory,
            &delta_key("", family, sample),
            format!("{PREFIX}{name}"),
            sample,
            tags,
            interval,
        )
    };
    let gauge = |name: &str, sample: &Sample, tags: Tags| report_gauge(format!("{PREFIX}{name}"), sample, tags, interval);

    let mut points = Vec::new();
    for sample in &family.samples {
        let tags = sample_tags(&ctx.base_tags, sample);
        let point = match family.name.as_str() {
            "apiserver_watch_events_total" => {
                let group = sample.facet("group").filter(|g| !g.is_empty()).unwrap_or("core");
                count(memory, "kind.watch_events", sample, tags.with("kube_group", group))
            }
            "apiserver_request_total" => {
                kind_tags(tags, sample).and_then(|tags| count(memory, "kind.served_requests", sample, tags))
            }
            "apiserver_longrunning_requests" => {
                kind_tags(tags, sample).map(|tags| gauge("kind.longrunning_requests", sample, tags))
            }
            "apiserver_storage_objects" => {
                storage_kind_tags(tags, sample).map(|tags| gauge("kind.stored_objects", sample, tags))
            }
            "apiserver_storage_size_bytes" => Some(gauge("total_storage.bytes", sample, tags)),
            "rest_client_requests_total" => {
                let mut sample = sample.clone();
                for (key, value) in &mut sample.labels {
                    if key.as_str() == "host" {
                        *value = value.replace("[::1]", "localhost");
                    }
                }
                let tags = sample_tags(&ctx.base_tags, &sample);
                count(memory, "sent_requests", &sample, tags)
            }
            _ => return points,
        };
        points.extend(point);
    }
    points
}

impl MetricSource for ApiserverSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn collect<'a>(&'a mut self, ctx: &'a CycleContext) -> BoxStream<'a, Result<DataPoint, SourceError>> {
        async_stream::stream! {
            let mut budget = ScrapeBudget::new(ctx.scrape_timeout);
            let mut families = match budget.step(self.open()).await {
                Ok(families) => families,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            loop {
                match budget.step(families.next_family()).await {
                    Ok(Some(family)) => {
                        for point in map_family(&mut self.memory, &family, ctx) {
                            yield Ok(point);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
        .boxed()
    }
}
