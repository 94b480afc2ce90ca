use super::{
    Identity,
    ListWatch,
    Listing,
    WatchError,
    WatchEvent,
    WatchStream,
};
use eyre::eyre;
use futures::{
    StreamExt as _,
    TryStreamExt as _,
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
    api::{
        ListParams,
        WatchParams,
    },
    core::WatchEvent as KubeWatchEvent,
    Api,
    Resource,
};
use serde::de::DeserializeOwned;
use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
};

const HTTP_GONE: u16 = 410;

/// Server-side watch timeout. The stream ends cleanly afterwards and the
/// reflector relists.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// [`ListWatch`] over the cluster API for one resource type.
pub struct KubeListWatch<K> {
    api: Api<K>,
    list_params: ListParams,
}

impl<K> KubeListWatch<K> {
    pub fn new(api: Api<K>) -> Self {
        Self {
            api,
            list_params: ListParams::default(),
        }
    }

    pub fn with_list_params(mut self, list_params: ListParams) -> Self {
        self.list_params = list_params;
        self
    }
}

fn classify(err: kube::Error) -> WatchError {
    match err {
        kube::Error::Api(status) if status.code == HTTP_GONE => WatchError::Gone,
        err => WatchError::Transport(err.into()),
    }
}

impl<K> ListWatch<K> for KubeListWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Listing<K>, WatchError>> + Send + '_>> {
        Box::pin(async move {
            let list = self.api.list(&self.list_params).await.map_err(classify)?;
            Ok(Listing {
                resource_version: list.metadata.resource_version.unwrap_or_default(),
                items: list.items,
            })
        })
    }

    fn watch(
        &self,
        resource_version: &str,
    ) -> Pin<Box<dyn Future<Output = Result<WatchStream<K>, WatchError>> + Send + '_>> {
        let resource_version = resource_version.to_string();
        Box::pin(async move {
            let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
            let events = self
                .api
                .watch(&params, &resource_version)
                .await
                .map_err(classify)?;

            Ok(events
                .map_err(classify)
                .and_then(|event| async move {
                    match event {
                        KubeWatchEvent::Added(obj) => Ok(WatchEvent::Added(obj)),
                        KubeWatchEvent::Modified(obj) => Ok(WatchEvent::Modified(obj)),
                        KubeWatchEvent::Deleted(obj) => Ok(WatchEvent::Deleted(obj)),
                        KubeWatchEvent::Bookmark(bookmark) => {
                            Ok(WatchEvent::Bookmark(bookmark.metadata.resource_version))
                        }
                        KubeWatchEvent::Error(status) if status.code == HTTP_GONE => Err(WatchError::Gone),
                        KubeWatchEvent::Error(status) => Err(WatchError::Transport(eyre!(
                            "watch error {}: {}",
                            status.code,
                            status.message
                        ))),
                    }
                })
                .boxed())
        })
    }
}

macro_rules! impl_identity {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Identity for $kind {
                fn key(&self) -> String {
                    let name = self.metadata.name.as_deref().unwrap_or_default();
                    match self.metadata.namespace.as_deref() {
                        Some(namespace) => format!("{namespace}/{name}"),
                        None => name.to_string(),
                    }
                }

                fn resource_version(&self) -> Option<&str> {
                    self.metadata.resource_version.as_deref()
                }
            }
        )+
    };
}

impl_identity!(Node, Pod, Deployment, DaemonSet, StatefulSet);

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use pretty_assertions::assert_eq;

    #[test]
    fn namespaced_and_cluster_keys() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("shop".to_string()),
                resource_version: Some("77".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pod.key(), "shop/web-0");
        assert_eq!(Identity::resource_version(&pod), Some("77"));

        let node = Node {
            metadata: ObjectMeta {
                name: Some("node-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(node.key(), "node-a");
        assert_eq!(Identity::resource_version(&node), None);
    }
}
