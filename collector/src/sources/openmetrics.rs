use super::{
    exposition::{
        delta_key,
        om_metric_name,
        report_count,
        report_gauge,
        sample_tags,
        with_submetric,
        ScrapeBudget,
    },
    transport::{
        ApiserverTransport,
        HttpTransport,
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
        MetricType,
    },
    points::{
        DataPoint,
        Tags,
    },
    reflector::{
        Reflector,
        Store,
    },
};
use eyre::Result;
use futures::{
    stream::BoxStream,
    StreamExt as _,
};
use k8s_openapi::api::core::v1::Pod;
use kube_shipper_config::{
    LabelSelector,
    OpenMetricsSourceConfig,
};
use std::sync::Arc;

const SOURCE_NAME: &str = "openmetrics";

/// A pod that opted into scraping.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeTarget {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub pod_ip: Option<String>,
    pub port: String,
    /// `kube_namespace`, `kube_pod` and `kube_<owner kind>` of the controller.
    pub tags: Tags,
}

impl ScrapeTarget {
    /// Returns `None` for pods that are not running or do not carry the
    /// selector label and the port annotation.
    pub fn from_pod(pod: &Pod, selector: &LabelSelector, port_annotation: &str) -> Option<Self> {
        let metadata = &pod.metadata;
        if !selector.matches(|key| metadata.labels.as_ref()?.get(key)) {
            return None;
        }
        let running = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .is_some_and(|phase| phase == "Running");
        if !running {
            return None;
        }
        let Some(port) = metadata.annotations.as_ref().and_then(|a| a.get(port_annotation)) else {
            trace!(pod = ?metadata.name, "Pod selected without a port annotation");
            return None;
        };

        let namespace = metadata.namespace.clone().unwrap_or_default();
        let name = metadata.name.clone().unwrap_or_default();
        let mut tags = Tags::new().with("kube_namespace", &namespace).with("kube_pod", &name);
        for owner in metadata.owner_references.iter().flatten() {
            if owner.controller == Some(true) {
                tags.push(&format!("kube_{}", owner.kind.to_lowercase()), &owner.name);
            }
        }

        Some(Self {
            namespace,
            name,
            uid: metadata.uid.clone().unwrap_or_default(),
            pod_ip: pod.status.as_ref().and_then(|status| status.pod_ip.clone()),
            port: port.trim().to_string(),
            tags,
        })
    }

    /// `<namespace>/<pod>`, the `source_name` of this target's error points.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn direct_url(&self, path: &str) -> Result<String, SourceError> {
        let ip = self
            .pod_ip
            .as_deref()
            .ok_or_else(|| SourceError::Data(format!("pod {} has no IP", self.display_name())))?;
        Ok(match ip.contains(':') {
            true => format!("http://[{ip}]:{}{path}", self.port),
            false => format!("http://{ip}:{}{path}", self.port),
        })
    }

    fn proxy_path(&self, path: &str) -> String {
        format!(
            "/api/v1/namespaces/{}/pods/{}:{}/proxy{path}",
            self.namespace, self.name, self.port
        )
    }
}

/// Scrapes every opted-in pod found in the pod cache.
pub struct OpenMetricsSource {
    selector: LabelSelector,
    port_annotation: String,
    path: String,
    proxied: bool,
    transport: Box<dyn ScrapeTransport>,
    pods: Arc<Reflector<Pod>>,
    memory: MonotonicMemory,
}

impl OpenMetricsSource {
    /// Scrapes pods directly, or through the API server's pod proxy when the
    /// config says `proxied`.
    pub fn new(config: &OpenMetricsSourceConfig, client: kube::Client, pods: Arc<Reflector<Pod>>) -> Result<Self> {
        let transport: Box<dyn ScrapeTransport> = match config.proxied {
            true => Box::new(ApiserverTransport::new(client)),
            false => Box::new(HttpTransport::new()?),
        };
        Self::with_transport(config, transport, pods)
    }

    pub fn with_transport(
        config: &OpenMetricsSourceConfig,
        transport: Box<dyn ScrapeTransport>,
        pods: Arc<Reflector<Pod>>,
    ) -> Result<Self> {
        Ok(Self {
            selector: config.pod_label.parse()?,
            port_annotation: config.port_annotation.clone(),
            path: config.path.clone(),
            proxied: config.proxied,
            transport,
            pods,
            memory: MonotonicMemory::new(),
        })
    }

    fn targets(&self, pods: &Store<Pod>) -> Vec<ScrapeTarget> {
        pods.iter()
            .filter_map(|pod| ScrapeTarget::from_pod(pod, &self.selector, &self.port_annotation))
            .collect()
    }

    async fn open(&self, target: &ScrapeTarget) -> Result<FamilyStream<BoxedBody>, SourceError> {
        let location = match self.proxied {
            true => target.proxy_path(&self.path),
            false => target.direct_url(&self.path)?,
        };
        Ok(FamilyStream::new(self.transport.open(&location).await?))
    }
}

/// Maps one scraped family onto points. Counters, summaries and histograms
/// go through the delta memory; unknown families are skipped.
pub(crate) fn map_family(
    memory: &mut MonotonicMemory,
    target: &ScrapeTarget,
    family: &MetricFamily,
    ctx: &CycleContext,
) -> Vec<DataPoint> {
    let name = om_metric_name(family);
    let mut tags = ctx.base_tags.clone();
    tags.extend(target.tags.iter().cloned());

    let mut points = Vec::new();
    for sample in &family.samples {
        let sample_tags = sample_tags(&tags, sample);
        let key = delta_key(&target.uid, family, sample);
        let point = match (family.metric_type, sample.submetric.as_str()) {
            (MetricType::Counter, "" | "total") => {
                report_count(memory, &key, name.clone(), sample, sample_tags, ctx.interval_secs)
            }
            (MetricType::Gauge, "") => Some(report_gauge(name.clone(), sample, sample_tags, ctx.interval_secs)),
            (MetricType::Summary, "sum" | "count") | (MetricType::Histogram, _) => report_count(
                memory,
                &key,
                with_submetric(&name, sample),
                sample,
                sample_tags,
                ctx.interval_secs,
            ),
            (MetricType::Unknown, _) => {
                debug!(family = %family.name, pod = %target.display_name(), "Skipping untyped family");
                return points;
            }
            _ => None,
        };
        points.extend(point);
    }
    points
}

fn target_failed(target: &ScrapeTarget, ctx: &CycleContext, err: SourceError) -> DataPoint {
    warn!(pod = %target.display_name(), %err, "Failed to scrape");
    DataPoint::loop_error(err.kind(), ctx.source_tags(SOURCE_NAME).with("source_name", target.display_name()))
}

impl MetricSource for OpenMetricsSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn collect<'a>(&'a mut self, ctx: &'a CycleContext) -> BoxStream<'a, Result<DataPoint, SourceError>> {
        async_stream::stream! {
            let pods = self.pods.snapshot();
            if !pods.is_synced() {
                yield Err(SourceError::NotReady("pod"));
                return;
            }
            let targets = self.targets(&pods);
            debug!(targets = targets.len(), "Scraping pods");

            for target in targets {
                let mut budget = ScrapeBudget::new(ctx.scrape_timeout);
                let mut families = match budget.step(self.open(&target)).await {
                    Ok(families) => families,
                    Err(err) => {
                        yield Ok(target_failed(&target, ctx, err));
                        continue;
                    }
                };

                loop {
                    match budget.step(families.next_family()).await {
                        Ok(Some(family)) => {
                            for point in map_family(&mut self.memory, &target, &family, ctx) {
                                yield Ok(point);
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            yield Ok(target_failed(&target, ctx, err));
                            break;
                        }
                    }
                }
            }
            trace!(memory = self.memory.len(), "Scrape pass done");
        }
        .boxed()
    }
}
