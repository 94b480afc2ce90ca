use super::{
    CacheStatus,
    KubeListWatch,
    Reflector,
};
use k8s_openapi::api::{
    apps::v1::{
        DaemonSet,
        Deployment,
        StatefulSet,
    },
    core::v1::{
        Node,
        Pod,
    },
};
use kube::{
    Api,
    Client,
};
use std::{
    sync::Arc,
    time::Duration,
};

/// The cluster-wide caches the sources read from.
#[derive(Clone)]
pub struct KubeWatcher {
    pub nodes: Arc<Reflector<Node>>,
    pub pods: Arc<Reflector<Pod>>,
    pub deployments: Arc<Reflector<Deployment>>,
    pub daemonsets: Arc<Reflector<DaemonSet>>,
    pub statefulsets: Arc<Reflector<StatefulSet>>,
}

impl KubeWatcher {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Arc::new(Reflector::new("node", KubeListWatch::new(Api::all(client.clone())))),
            pods: Arc::new(Reflector::new("pod", KubeListWatch::new(Api::all(client.clone())))),
            deployments: Arc::new(Reflector::new("deployment", KubeListWatch::new(Api::all(client.clone())))),
            daemonsets: Arc::new(Reflector::new("daemonset", KubeListWatch::new(Api::all(client.clone())))),
            statefulsets: Arc::new(Reflector::new("statefulset", KubeListWatch::new(Api::all(client)))),
        }
    }

    pub fn start_all(&self) {
        for cache in self.caches() {
            debug!(kind = cache.kind(), "Starting reflector");
        }
        self.nodes.run();
        self.pods.run();
        self.deployments.run();
        self.daemonsets.run();
        self.statefulsets.run();
    }

    pub fn caches(&self) -> Vec<Arc<dyn CacheStatus>> {
        vec![
            self.nodes.clone(),
            self.pods.clone(),
            self.deployments.clone(),
            self.daemonsets.clone(),
            self.statefulsets.clone(),
        ]
    }

    /// True once every cache has completed its first listing.
    pub fn is_synced(&self) -> bool {
        self.caches().iter().all(|cache| cache.is_synced())
    }

    /// Waits up to `timeout` for every cache to sync. Returns whether they did.
    pub async fn wait_synced(&self, timeout: Duration) -> bool {
        let all = async {
            tokio::join!(
                self.nodes.wait_synced(),
                self.pods.wait_synced(),
                self.deployments.wait_synced(),
                self.daemonsets.wait_synced(),
                self.statefulsets.wait_synced(),
            );
        };
        match tokio::time::timeout(timeout, all).await {
            Ok(()) => true,
            Err(_) => {
                let pending: Vec<_> = self
                    .caches()
                    .iter()
                    .filter(|cache| !cache.is_synced())
                    .map(|cache| cache.kind())
                    .collect();
                warn!(?pending, "Caches did not sync in time");
                false
            }
        }
    }
}
