//! Controller registry and the shared worker pool.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::ManagerOptions;
use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::resource::{Managed, ObjectKey};

/// Work item: one object of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub kind: &'static str,
    pub key: ObjectKey,
}

impl QueueKey {
    pub fn new(kind: &'static str, key: ObjectKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A kind-erased reconciler the manager can drive.
#[async_trait]
pub trait Controller: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome;

    /// Keys of every stored object of this kind.
    async fn list_keys(&self) -> Result<Vec<ObjectKey>>;

    /// Feed triggering store events into `queue` until the store closes.
    ///
    /// The subscription is taken before this returns, so nothing written
    /// after the call is missed.
    fn start_watch(self: Arc<Self>, queue: WorkQueue<QueueKey>) -> JoinHandle<()>;
}

#[async_trait]
impl<R: Managed> Controller for Reconciler<R> {
    fn name(&self) -> &str {
        Reconciler::name(self)
    }

    fn kind(&self) -> &'static str {
        R::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        Reconciler::reconcile(self, key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        let objects = self.store().list().await?;
        Ok(objects.iter().map(Managed::key).collect())
    }

    fn start_watch(self: Arc<Self>, queue: WorkQueue<QueueKey>) -> JoinHandle<()> {
        let mut events = self.store().watch();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.triggers_reconcile() {
                            debug!(controller = %self.name(), object = %event.key(), event = event.name(), "change triggers reconcile");
                            queue.add(QueueKey::new(R::KIND, event.key()));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(controller = %self.name(), skipped, "watch fell behind, relisting");
                        match Controller::list_keys(self.as_ref()).await {
                            Ok(keys) => {
                                for key in keys {
                                    queue.add(QueueKey::new(R::KIND, key));
                                }
                            }
                            Err(e) => warn!(controller = %self.name(), error = %e, "relist failed"),
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!(controller = %self.name(), "watch closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Controllers by kind. One controller per kind.
#[derive(Default)]
pub struct Registry {
    controllers: Vec<Arc<dyn Controller>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, controller: Arc<dyn Controller>) -> Result<()> {
        if self.get(controller.kind()).is_some() {
            return Err(Error::config(format!(
                "a controller for kind {} is already registered",
                controller.kind()
            )));
        }
        info!(controller = %controller.name(), kind = controller.kind(), "registered controller");
        self.controllers.push(controller);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Controller>> {
        self.controllers.iter().find(|c| c.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.controllers.iter().map(|c| c.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

/// Runs every registered controller on one worker pool.
pub struct Manager {
    controllers: Arc<HashMap<&'static str, Arc<dyn Controller>>>,
    options: ManagerOptions,
    queue: WorkQueue<QueueKey>,
}

impl Manager {
    pub fn new(registry: Registry, options: ManagerOptions) -> Result<Self> {
        options.validate()?;
        if registry.is_empty() {
            return Err(Error::config("no controllers registered"));
        }
        let controllers = registry
            .controllers
            .into_iter()
            .map(|c| (c.kind(), c))
            .collect();

        Ok(Self {
            controllers: Arc::new(controllers),
            options,
            queue: WorkQueue::new(),
        })
    }

    /// Handle to the shared queue, e.g. to trigger a run by hand.
    pub fn queue(&self) -> WorkQueue<QueueKey> {
        self.queue.clone()
    }

    /// Run until `shutdown` resolves. In-flight reconciles finish first.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut watches = Vec::with_capacity(self.controllers.len());
        for controller in self.controllers.values() {
            watches.push(Arc::clone(controller).start_watch(self.queue.clone()));
        }

        let mut initial = 0;
        for controller in self.controllers.values() {
            let keys = controller.list_keys().await?;
            initial += keys.len();
            for key in keys {
                self.queue.add(QueueKey::new(controller.kind(), key));
            }
        }

        let mut workers = JoinSet::new();
        for id in 0..self.options.workers {
            workers.spawn(worker(id, self.queue.clone(), Arc::clone(&self.controllers)));
        }
        info!(
            workers = self.options.workers,
            controllers = self.controllers.len(),
            objects = initial,
            "manager started"
        );

        shutdown.await;
        info!("manager shutting down");

        self.queue.shutdown();
        for watch in &watches {
            watch.abort();
        }
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker exited abnormally");
            }
        }
        info!("manager stopped");
        Ok(())
    }
}

async fn worker(
    id: usize,
    queue: WorkQueue<QueueKey>,
    controllers: Arc<HashMap<&'static str, Arc<dyn Controller>>>,
) {
    debug!(worker = id, "worker started");
    while let Some(item) = queue.get().await {
        let Some(controller) = controllers.get(item.kind) else {
            warn!(worker = id, item = %item, "no controller for kind");
            queue.done(&item);
            continue;
        };

        let outcome = controller.reconcile(&item.key).await;
        queue.done(&item);
        if let Some(after) = outcome.requeue_after {
            queue.add_after(item, after);
        }
    }
    debug!(worker = id, "worker stopped");
}
