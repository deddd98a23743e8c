//! Test helpers for provisor-runtime integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use provisor_runtime::store;
use provisor_runtime::{
    ConnectionDetails, Connector, Error, ExternalClient, ExternalCreation, ExternalObservation,
    ExternalRequest, ExternalUpdate, InMemoryStore, Managed, ObjectKey, ObjectMeta, ObjectStore,
    ResourceStatus, Result, SecretRef, WatchEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub size: u32,
}

/// A managed kind with a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResource {
    pub meta: ObjectMeta,
    pub spec: TestSpec,
    pub status: ResourceStatus,
    pub secret: Option<SecretRef>,
}

impl TestResource {
    pub fn new(name: &str, size: u32) -> Self {
        Self {
            meta: ObjectMeta::namespaced("default", name),
            spec: TestSpec { size },
            status: ResourceStatus::default(),
            secret: Some(SecretRef::new("default", format!("{}-conn", name))),
        }
    }

    pub fn with_external_name(mut self, name: &str) -> Self {
        self.set_external_name(name).unwrap();
        self
    }
}

impl Managed for TestResource {
    type Spec = TestSpec;
    const KIND: &'static str = "TestResource";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
    fn spec(&self) -> &TestSpec {
        &self.spec
    }
    fn status(&self) -> &ResourceStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut ResourceStatus {
        &mut self.status
    }
    fn connection_secret_ref(&self) -> Option<&SecretRef> {
        self.secret.as_ref()
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced("default", name)
}

/// A provider call as seen by the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Observe(String),
    Create(String, Value),
    Update(String, Value),
    Delete(String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Observe(_))
    }
}

/// Failure to inject into the next call of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Throttle,
    NotFound,
}

impl Fault {
    fn error(self, op: &str) -> Error {
        match self {
            Fault::Throttle => Error::throttled(format!("{op}: rate exceeded")),
            Fault::NotFound => Error::not_found(format!("{op}: no such resource")),
        }
    }
}

#[derive(Default)]
struct ProviderState {
    resources: BTreeMap<String, Value>,
    calls: Vec<Call>,
    faults: HashMap<&'static str, Fault>,
    observe_delay: Option<Duration>,
    /// Reported by observe regardless of what was asked for.
    reported_name: Option<String>,
}

/// In-memory provider recording every call.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, snapshot: Value) {
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(name.to_string(), snapshot);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().resources.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Fail every call of `op` ("observe", "create", "update", "delete")
    /// until cleared.
    pub fn fail(&self, op: &'static str, fault: Fault) {
        self.state.lock().unwrap().faults.insert(op, fault);
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().faults.clear();
    }

    pub fn slow_observe(&self, delay: Duration) {
        self.state.lock().unwrap().observe_delay = Some(delay);
    }

    pub fn report_name(&self, name: &str) {
        self.state.lock().unwrap().reported_name = Some(name.to_string());
    }

    fn record(&self, op: &'static str, call: Call) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.faults.get(op) {
            Some(fault) => Err(fault.error(op)),
            None => Ok(()),
        }
    }
}

fn details(name: &str) -> ConnectionDetails {
    let mut details = ConnectionDetails::new();
    details.insert("name".to_string(), name.as_bytes().to_vec());
    details
}

struct FakeClient {
    provider: FakeProvider,
}

#[async_trait]
impl ExternalClient for FakeClient {
    async fn observe(&self, req: &ExternalRequest) -> Result<ExternalObservation> {
        let name = req.name().to_string();
        let delay = self.provider.state.lock().unwrap().observe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.provider.record("observe", Call::Observe(name.clone()))?;

        let state = self.provider.state.lock().unwrap();
        let Some(snapshot) = state.resources.get(&name) else {
            return Ok(ExternalObservation::missing());
        };
        let mut observation =
            ExternalObservation::exists(snapshot.clone()).with_connection_details(details(&name));
        if let Some(reported) = &state.reported_name {
            observation = observation.with_external_name(reported.clone());
        }
        Ok(observation)
    }

    async fn create(&self, req: &ExternalRequest) -> Result<ExternalCreation> {
        let name = format!("ext-{}", req.name());
        self.provider
            .record("create", Call::Create(req.name().to_string(), req.to_value()))?;
        self.provider.insert(&name, req.to_value());
        Ok(ExternalCreation {
            external_name: Some(name.clone()),
            connection_details: details(&name),
        })
    }

    async fn update(&self, req: &ExternalRequest, _snapshot: &Value) -> Result<ExternalUpdate> {
        let name = req.name().to_string();
        self.provider
            .record("update", Call::Update(name.clone(), req.to_value()))?;
        self.provider.insert(&name, req.to_value());
        Ok(ExternalUpdate::default())
    }

    async fn delete(&self, req: &ExternalRequest) -> Result<()> {
        let name = req.name().to_string();
        self.provider.record("delete", Call::Delete(name.clone()))?;
        match self.provider.state.lock().unwrap().resources.remove(&name) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(name)),
        }
    }
}

/// Hands out clients for a [`FakeProvider`].
#[derive(Default)]
pub struct FakeConnector {
    pub provider: FakeProvider,
    pub refuse: AtomicBool,
}

impl FakeConnector {
    pub fn new(provider: FakeProvider) -> Self {
        Self {
            provider,
            refuse: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connector<TestResource> for FakeConnector {
    async fn connect(&self, _obj: &TestResource) -> Result<Box<dyn ExternalClient>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connect("credentials rejected"));
        }
        Ok(Box::new(FakeClient {
            provider: self.provider.clone(),
        }))
    }
}

/// Store that loses the next `n` update races to a concurrent writer.
///
/// The concurrent writer adds an annotation, so tests can check that the
/// retried write kept it.
pub struct RacyStore<R> {
    pub inner: InMemoryStore<R>,
    races: AtomicU32,
}

impl<R: Managed> RacyStore<R> {
    pub fn new(races: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            races: AtomicU32::new(races),
        }
    }
}

#[async_trait]
impl<R: Managed> ObjectStore<R> for RacyStore<R> {
    async fn get(&self, key: &ObjectKey) -> store::Result<Option<R>> {
        self.inner.get(key).await
    }

    async fn list(&self) -> store::Result<Vec<R>> {
        self.inner.list().await
    }

    async fn create(&self, obj: R) -> store::Result<R> {
        self.inner.create(obj).await
    }

    async fn update(&self, obj: R) -> store::Result<R> {
        let lost = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            if let Some(mut latest) = self.inner.get(&obj.key()).await? {
                let n = latest.meta().annotations.len();
                latest
                    .meta_mut()
                    .annotations
                    .insert(format!("example.com/touched-{}", n), "yes".to_string());
                self.inner.update(latest).await?;
            }
        }
        self.inner.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> store::Result<()> {
        self.inner.delete(key).await
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.inner.watch()
    }
}

/// Store whose reads never return once `stuck` is set.
pub struct StuckStore<R> {
    pub inner: InMemoryStore<R>,
    pub stuck: AtomicBool,
}

impl<R: Managed> StuckStore<R> {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            stuck: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<R: Managed> ObjectStore<R> for StuckStore<R> {
    async fn get(&self, key: &ObjectKey) -> store::Result<Option<R>> {
        if self.stuck.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.get(key).await
    }

    async fn list(&self) -> store::Result<Vec<R>> {
        self.inner.list().await
    }

    async fn create(&self, obj: R) -> store::Result<R> {
        self.inner.create(obj).await
    }

    async fn update(&self, obj: R) -> store::Result<R> {
        self.inner.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> store::Result<()> {
        self.inner.delete(key).await
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.inner.watch()
    }
}
