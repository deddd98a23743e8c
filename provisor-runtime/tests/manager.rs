//! Manager and worker pool, end to end against the in-memory store.

mod common;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Call, FakeConnector, FakeProvider, TestResource, key};
use provisor_runtime::condition::TYPE_SYNCED;
use provisor_runtime::{
    Connector, ControllerOptions, Error, ExternalClient, ExternalCreation, ExternalObservation,
    ExternalRequest, ExternalUpdate, InMemoryStore, Managed, Manager, ManagerOptions,
    ObjectStore, QueueKey, Reconciler, Registry, Result,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;

fn options() -> ManagerOptions {
    ManagerOptions {
        workers: 4,
        post_mutation_wait: Duration::from_millis(20),
        backoff_base: Duration::from_millis(20),
        backoff_ceiling: Duration::from_millis(200),
        ..Default::default()
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn start(
    store: Arc<InMemoryStore<TestResource>>,
    connector: Arc<dyn Connector<TestResource>>,
) -> (
    oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<()>>,
    provisor_runtime::WorkQueue<QueueKey>,
) {
    let reconciler = Reconciler::new(
        store,
        ControllerOptions::<TestResource>::new(connector),
        &options(),
    );
    let mut registry = Registry::new();
    registry.register(Arc::new(reconciler)).unwrap();
    let manager = Manager::new(registry, options()).unwrap();
    let queue = manager.queue();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(manager.run_until(async move {
        let _ = stopped.await;
    }));
    (stop, handle, queue)
}

async fn synced(store: &InMemoryStore<TestResource>, name: &str) -> bool {
    store
        .get(&key(name))
        .await
        .unwrap()
        .is_some_and(|o| o.get_condition(TYPE_SYNCED).is_true())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_converge_delete() {
    let store = Arc::new(InMemoryStore::<TestResource>::new());
    let provider = FakeProvider::new();
    let (stop, handle, _) = start(store.clone(), Arc::new(FakeConnector::new(provider.clone())));

    store.create(TestResource::new("web", 3)).await.unwrap();
    eventually(|| synced(&store, "web")).await;
    eventually(|| async { provider.get("ext-web").is_some() }).await;

    // The post-mutation requeue confirms the create with a plain observe.
    eventually(|| async {
        provider
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Observe(n) if n == "ext-web"))
            .count()
            >= 1
    })
    .await;

    // A spec change is picked up through the watch.
    loop {
        let mut obj = store.get(&key("web")).await.unwrap().unwrap();
        obj.spec.size = 5;
        match store.update(obj).await {
            Ok(_) => break,
            // Lost a race with a status write.
            Err(e) if e.is_conflict() => continue,
            Err(e) => panic!("{e}"),
        }
    }
    eventually(|| async { provider.get("ext-web") == Some(json!({"size": 5})) }).await;

    store.delete(&key("web")).await.unwrap();
    eventually(|| async { store.get(&key("web")).await.unwrap().is_none() }).await;
    assert!(provider.get("ext-web").is_none());
    assert_eq!(
        provider
            .mutations()
            .iter()
            .filter(|c| matches!(c, Call::Create(..)))
            .count(),
        1
    );

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

/// Fails to connect for objects named "bad".
struct Selective(FakeConnector);

#[async_trait]
impl Connector<TestResource> for Selective {
    async fn connect(&self, obj: &TestResource) -> Result<Box<dyn ExternalClient>> {
        if obj.meta().name == "bad" {
            return Err(Error::connect("no credentials for bad"));
        }
        self.0.connect(obj).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_failing_object_does_not_stop_others() {
    let store = Arc::new(InMemoryStore::<TestResource>::new());
    let provider = FakeProvider::new();
    store.create(TestResource::new("bad", 1)).await.unwrap();
    store.create(TestResource::new("good", 1)).await.unwrap();

    let (stop, handle, _) = start(
        store.clone(),
        Arc::new(Selective(FakeConnector::new(provider.clone()))),
    );

    eventually(|| synced(&store, "good")).await;
    let bad = store.get(&key("bad")).await.unwrap().unwrap();
    assert!(!bad.get_condition(TYPE_SYNCED).is_true());

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

/// Tracks how many runs touch the provider at once.
#[derive(Default)]
struct Concurrency {
    in_flight: AtomicUsize,
    max: AtomicUsize,
    observes: AtomicUsize,
}

struct SlowClient(Arc<Concurrency>);

#[async_trait]
impl ExternalClient for SlowClient {
    async fn observe(&self, _req: &ExternalRequest) -> Result<ExternalObservation> {
        let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max.fetch_max(now, Ordering::SeqCst);
        self.0.observes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ExternalObservation::exists(json!({"size": 1})))
    }

    async fn create(&self, _req: &ExternalRequest) -> Result<ExternalCreation> {
        Err(Error::provider("unexpected create"))
    }

    async fn update(&self, _req: &ExternalRequest, _snapshot: &Value) -> Result<ExternalUpdate> {
        Err(Error::provider("unexpected update"))
    }

    async fn delete(&self, _req: &ExternalRequest) -> Result<()> {
        Err(Error::provider("unexpected delete"))
    }
}

struct SlowConnector(Arc<Concurrency>);

#[async_trait]
impl Connector<TestResource> for SlowConnector {
    async fn connect(&self, _obj: &TestResource) -> Result<Box<dyn ExternalClient>> {
        Ok(Box::new(SlowClient(self.0.clone())))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_object_never_runs_concurrently() {
    let store = Arc::new(InMemoryStore::<TestResource>::new());
    let mut obj = TestResource::new("web", 1).with_external_name("asg-1");
    obj.meta.add_finalizer(provisor_runtime::FINALIZER);
    store.create(obj).await.unwrap();

    let stats = Arc::new(Concurrency::default());
    let (stop, handle, queue) = start(store.clone(), Arc::new(SlowConnector(stats.clone())));

    eventually(|| async { stats.observes.load(Ordering::SeqCst) >= 1 }).await;
    for _ in 0..20 {
        queue.add(QueueKey::new(TestResource::KIND, key("web")));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    eventually(|| async { stats.in_flight.load(Ordering::SeqCst) == 0 && queue.is_empty() })
        .await;

    assert_eq!(stats.max.load(Ordering::SeqCst), 1);
    // Twenty triggers over ~100ms coalesce into a handful of runs.
    let observes = stats.observes.load(Ordering::SeqCst);
    assert!(observes >= 2 && observes < 20, "{} runs", observes);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
