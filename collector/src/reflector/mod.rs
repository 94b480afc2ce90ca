//! Locally mirrored cluster collections.
//!
//! A [`Reflector`] owns one background task that lists a collection, watches
//! it from the listing's cursor and folds every change into a [`Store`].
//! Readers only ever see whole published snapshots.

mod kube_api;
mod store;
mod transport;
mod watcher;

pub use kube_api::KubeListWatch;
pub use store::Store;
pub use transport::{
    Identity,
    ListWatch,
    Listing,
    WatchError,
    WatchEvent,
    WatchStream,
};
pub use watcher::KubeWatcher;

use futures::{
    FutureExt as _,
    StreamExt as _,
};
use std::{
    sync::{
        Arc,
        OnceLock,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    time::Instant,
};
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};

/// Events already buffered on the watch stream are folded together and
/// published once, up to this many.
const MAX_COALESCED_EVENTS: usize = 256;

/// A watch open this long counts as healthy even without events.
const HEALTHY_WATCH: Duration = Duration::from_secs(30);

/// Read-only view of a cache, independent of the object type.
pub trait CacheStatus: Send + Sync {
    fn kind(&self) -> &'static str;

    fn is_synced(&self) -> bool;

    fn cached_len(&self) -> usize;
}

pub struct Reflector<K> {
    kind: &'static str,
    transport: Arc<dyn ListWatch<K>>,
    publisher: Arc<watch::Sender<Arc<Store<K>>>>,
    task: OnceLock<Arc<DropGuard>>,
}

impl<K> Reflector<K>
where
    K: Identity + Send + Sync + 'static,
{
    pub fn new(kind: &'static str, transport: impl ListWatch<K>) -> Self {
        let (publisher, _) = watch::channel(Arc::new(Store::default()));
        Self {
            kind,
            transport: Arc::new(transport),
            publisher: Arc::new(publisher),
            task: OnceLock::new(),
        }
    }

    /// Starts the list/watch task. Calling it again has no effect. The task
    /// stops when the reflector is dropped.
    pub fn run(&self) {
        self.task.get_or_init(|| {
            let task_cancellation_token = CancellationToken::new();
            let task_cancellation_guard = task_cancellation_token.clone().drop_guard();

            tokio::task::spawn({
                let kind = self.kind;
                let transport = self.transport.clone();
                let publisher = self.publisher.clone();
                async move {
                    tokio::select! {
                        biased;
                        _ = task_cancellation_token.cancelled() => {},
                        _ = reflect(kind, transport, publisher) => {},
                    }
                    debug!(kind, "Reflector task stopped");
                }
            });

            Arc::new(task_cancellation_guard)
        });
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Store<K>> {
        self.publisher.borrow().clone()
    }

    /// Every cached object, ordered by key. Empty until the first listing.
    pub fn list_cached(&self) -> Vec<Arc<K>> {
        self.snapshot().iter().cloned().collect()
    }

    pub fn is_synced(&self) -> bool {
        self.publisher.borrow().is_synced()
    }

    /// Resolves once the first listing has been published.
    pub async fn wait_synced(&self) {
        let mut receiver = self.publisher.subscribe();
        // the sender lives as long as `self`
        let _ = receiver.wait_for(|store| store.is_synced()).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Store<K>>> {
        self.publisher.subscribe()
    }
}

impl<K> CacheStatus for Reflector<K>
where
    K: Identity + Send + Sync + 'static,
{
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn is_synced(&self) -> bool {
        Reflector::is_synced(self)
    }

    fn cached_len(&self) -> usize {
        self.publisher.borrow().len()
    }
}

/// List, then watch until the stream breaks, forever. The published store
/// never goes back to unsynced once a listing succeeded.
///
/// The backoff only resets once a watch proved healthy: it delivered an event
/// or stayed open for [`HEALTHY_WATCH`]. A listing alone does not count, so a
/// watch that fails or closes right away keeps relisting at a backing off
/// pace.
async fn reflect<K>(
    kind: &'static str,
    transport: Arc<dyn ListWatch<K>>,
    publisher: Arc<watch::Sender<Arc<Store<K>>>>,
) where
    K: Identity + Send + Sync + 'static,
{
    let mut backoff = maybe_backoff::MaybeBackoff::default();
    let mut working = Store::<K>::default();

    loop {
        backoff.sleep().await;

        let listing = match transport.list().await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(kind, %err, "List failed, retrying...");
                backoff.arm();
                continue;
            }
        };
        let first_sync = !working.is_synced();
        working.replace(listing.items, listing.resource_version);
        publisher.send_replace(Arc::new(working.clone()));
        if first_sync {
            info!(kind, objects = working.len(), "Cache synced");
        } else {
            debug!(kind, objects = working.len(), "Relisted");
        }

        let opened = Instant::now();
        let (delivered, outcome) = watch_until_broken(kind, transport.as_ref(), &publisher, &mut working).await;
        if delivered > 0 || opened.elapsed() >= HEALTHY_WATCH {
            backoff.disarm();
        } else {
            backoff.arm();
        }

        match outcome {
            None => debug!(kind, delivered, "Watch stream ended, relisting"),
            Some(WatchError::Gone) => info!(kind, "Resource version expired, relisting"),
            Some(err @ WatchError::Transport(_)) => warn!(kind, %err, "Watch failed, relisting..."),
        }
    }
}

/// Folds watch events into `working` and publishes after each burst. Returns
/// the number of events applied and the error that broke the stream, `None`
/// on a clean end.
async fn watch_until_broken<K>(
    kind: &'static str,
    transport: &dyn ListWatch<K>,
    publisher: &watch::Sender<Arc<Store<K>>>,
    working: &mut Store<K>,
) -> (usize, Option<WatchError>)
where
    K: Identity + Send + Sync + 'static,
{
    let mut events = match transport.watch(working.resource_version()).await {
        Ok(events) => events.fuse(),
        Err(err) => return (0, Some(err)),
    };

    let mut delivered = 0;
    while let Some(first) = events.next().await {
        let mut burst = vec![first];
        while burst.len() < MAX_COALESCED_EVENTS {
            match events.next().now_or_never() {
                Some(Some(event)) => burst.push(event),
                _ => break,
            }
        }

        let mut failure = None;
        for event in burst {
            match event {
                Ok(event) => {
                    working.apply(event);
                    delivered += 1;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        trace!(kind, resource_version = working.resource_version(), "Publishing");
        publisher.send_replace(Arc::new(working.clone()));

        if failure.is_some() {
            return (delivered, failure);
        }
    }

    (delivered, None)
}

#[cfg(test)]
mod tests {
    use super::{
        store::tests::{
            obj,
            Obj,
        },
        *,
    };
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{
                AtomicUsize,
                Ordering,
            },
            Mutex,
        },
        time::Duration,
    };

    type Script<T> = Arc<Mutex<VecDeque<T>>>;

    /// Replays scripted listings and watch streams. Watch streams hang after
    /// their scripted events; once a script runs out, lists fail and watches
    /// hang right away.
    #[derive(Clone, Default)]
    struct Scripted {
        listings: Script<Result<Listing<Obj>, WatchError>>,
        watches: Script<Vec<Result<WatchEvent<Obj>, WatchError>>>,
        watched_from: Arc<Mutex<Vec<String>>>,
        lists: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn listing(self, items: Vec<Obj>, rv: &str) -> Self {
            self.listings.lock().unwrap().push_back(Ok(Listing {
                items,
                resource_version: rv.to_string(),
            }));
            self
        }

        fn failed_listing(self) -> Self {
            self.listings
                .lock()
                .unwrap()
                .push_back(Err(WatchError::Transport(eyre::eyre!("connection refused"))));
            self
        }

        fn then_watch(self, events: Vec<Result<WatchEvent<Obj>, WatchError>>) -> Self {
            self.watches.lock().unwrap().push_back(events);
            self
        }
    }

    impl ListWatch<Obj> for Scripted {
        fn list(&self) -> Pin<Box<dyn Future<Output = Result<Listing<Obj>, WatchError>> + Send + '_>> {
            Box::pin(async move {
                self.lists.fetch_add(1, Ordering::SeqCst);
                self.listings
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(WatchError::Transport(eyre::eyre!("script exhausted"))))
            })
        }

        fn watch(
            &self,
            resource_version: &str,
        ) -> Pin<Box<dyn Future<Output = Result<WatchStream<Obj>, WatchError>> + Send + '_>> {
            self.watched_from.lock().unwrap().push(resource_version.to_string());
            let next = self.watches.lock().unwrap().pop_front();
            Box::pin(async move {
                Ok(match next {
                    Some(events) => stream::iter(events).chain(stream::pending()).boxed(),
                    None => stream::pending().boxed(),
                })
            })
        }
    }

    /// Lists always succeed; every watch fails or ends before delivering
    /// anything.
    #[derive(Clone, Default)]
    struct Flapping {
        ends_cleanly: bool,
        lists: Arc<AtomicUsize>,
    }

    impl ListWatch<Obj> for Flapping {
        fn list(&self) -> Pin<Box<dyn Future<Output = Result<Listing<Obj>, WatchError>> + Send + '_>> {
            Box::pin(async move {
                self.lists.fetch_add(1, Ordering::SeqCst);
                Ok(Listing {
                    items: vec![obj("a", "1", 1)],
                    resource_version: "1".to_string(),
                })
            })
        }

        fn watch(
            &self,
            _resource_version: &str,
        ) -> Pin<Box<dyn Future<Output = Result<WatchStream<Obj>, WatchError>> + Send + '_>> {
            let ends_cleanly = self.ends_cleanly;
            Box::pin(async move {
                match ends_cleanly {
                    true => Ok(stream::empty().boxed()),
                    false => Err(WatchError::Transport(eyre::eyre!("403 forbidden"))),
                }
            })
        }
    }

    fn keys(reflector: &Reflector<Obj>) -> Vec<String> {
        reflector.list_cached().iter().map(|o| o.key()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn lists_then_applies_watch_events() {
        let script = Scripted::default()
            .listing(vec![obj("a", "1", 1), obj("b", "1", 1)], "10")
            .then_watch(vec![
                Ok(WatchEvent::Modified(obj("a", "11", 2))),
                Ok(WatchEvent::Deleted(obj("b", "12", 1))),
                Ok(WatchEvent::Added(obj("c", "13", 1))),
                Ok(WatchEvent::Bookmark("20".to_string())),
            ]);
        let reflector = Reflector::new("objects", script.clone());
        assert!(!reflector.is_synced());
        assert!(reflector.list_cached().is_empty());

        reflector.run();
        reflector.run();
        reflector.wait_synced().await;

        let mut updates = reflector.subscribe();
        updates.wait_for(|store| store.resource_version() == "20").await.unwrap();
        assert_eq!(keys(&reflector), vec!["default/a", "default/c"]);
        assert_eq!(reflector.snapshot().get("default/a").unwrap().data, 2);
        assert_eq!(script.watched_from.lock().unwrap()[0], "10");
        assert_eq!(script.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_listing() {
        let script = Scripted::default()
            .failed_listing()
            .failed_listing()
            .listing(vec![obj("a", "1", 1)], "5");
        let reflector = Reflector::new("objects", script.clone());
        reflector.run();

        tokio::time::timeout(Duration::from_secs(600), reflector.wait_synced())
            .await
            .unwrap();
        assert_eq!(script.lists.load(Ordering::SeqCst), 3);
        assert_eq!(keys(&reflector), vec!["default/a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn gone_triggers_relist_and_stays_synced() {
        let script = Scripted::default()
            .listing(vec![obj("a", "1", 1)], "10")
            .then_watch(vec![Ok(WatchEvent::Added(obj("b", "11", 1))), Err(WatchError::Gone)])
            .listing(vec![obj("z", "30", 9)], "30");
        let reflector = Reflector::new("objects", script.clone());
        reflector.run();
        reflector.wait_synced().await;

        let mut updates = reflector.subscribe();
        updates
            .wait_for(|store| {
                assert!(store.is_synced());
                store.resource_version() == "30"
            })
            .await
            .unwrap();
        assert_eq!(keys(&reflector), vec!["default/z"]);
        assert!(reflector.is_synced());
        assert_eq!(script.lists.load(Ordering::SeqCst), 2);
        assert_eq!(*script.watched_from.lock().unwrap(), vec!["10", "30"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_keeps_cache_while_relisting() {
        let script = Scripted::default()
            .listing(vec![obj("a", "1", 1)], "10")
            .then_watch(vec![Err(WatchError::Transport(eyre::eyre!("reset")))]);
        let reflector = Reflector::new("objects", script.clone());
        reflector.run();
        reflector.wait_synced().await;

        // every later listing fails; the last good content stays readable
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(script.lists.load(Ordering::SeqCst) > 1);
        assert!(reflector.is_synced());
        assert_eq!(keys(&reflector), vec!["default/a"]);
        assert_eq!(reflector.cached_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_task() {
        let script = Scripted::default().listing(vec![], "1");
        let reflector = Reflector::new("objects", script.clone());
        reflector.run();
        reflector.wait_synced().await;
        drop(reflector);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(script.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_watch_relists_with_backoff() {
        for ends_cleanly in [false, true] {
            let script = Flapping {
                ends_cleanly,
                ..Default::default()
            };
            let reflector = Reflector::new("objects", script.clone());
            reflector.run();
            reflector.wait_synced().await;

            tokio::time::sleep(Duration::from_secs(60)).await;
            let lists = script.lists.load(Ordering::SeqCst);
            assert!((10..60).contains(&lists), "{lists} listings in 60s (ends_cleanly: {ends_cleanly})");
            assert!(reflector.is_synced());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_does_not_block_runtime() {
        let script = Scripted::default();
        let reflector = Reflector::new("objects", script.clone());
        reflector.run();

        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        assert!(script.lists.load(Ordering::SeqCst) > 5);
        assert!(!reflector.is_synced());
    }
}
