//! The managed resource reconciler.
//!
//! One run reads the object, observes the external resource, decides what
//! to do and does at most one mutating call (create, update or delete). The
//! outcome tells the manager when to run the object again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::condition::{
    self, Condition, ConditionStatus, REASON_CONTRACT_VIOLATION, REASON_CREATE_BLOCKED,
    REASON_CREATE_FAILED, REASON_DELETE_FAILED, REASON_DELETION_BLOCKED, REASON_RECONCILE_BLOCKED,
    REASON_RECONCILE_ERROR, REASON_UPDATE_BLOCKED, REASON_UPDATE_FAILED, TYPE_SYNCED,
};
use crate::config::ManagerOptions;
use crate::connection::{ConnectionPublisher, PublisherChain};
use crate::diff::diff;
use crate::error::{Error, ErrorClass, Result};
use crate::external::{Connector, ExternalClient, ExternalObservation, ExternalRequest};
use crate::hooks::{DeleteDecision, Hooks};
use crate::recorder::{self, Event, EventRecorder, TracingRecorder};
use crate::resource::{FINALIZER, Managed, ObjectKey};
use crate::scheduler::{Backoff, RequeuePolicy};
use crate::store::{ObjectStore, StoreError};

/// Where a run ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Nothing was learned about the external resource.
    Unknown,
    ObserveFailed,
    DoesNotExist,
    ExistsUpToDate,
    ExistsOutOfDate,
    Creating,
    Updating,
    Deleting,
    /// The object is gone from the store, or was just released.
    Deleted,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileState::Unknown => "Unknown",
            ReconcileState::ObserveFailed => "ObserveFailed",
            ReconcileState::DoesNotExist => "DoesNotExist",
            ReconcileState::ExistsUpToDate => "ExistsUpToDate",
            ReconcileState::ExistsOutOfDate => "ExistsOutOfDate",
            ReconcileState::Creating => "Creating",
            ReconcileState::Updating => "Updating",
            ReconcileState::Deleting => "Deleting",
            ReconcileState::Deleted => "Deleted",
        };
        write!(f, "{}", s)
    }
}

/// Result of one run. Not persisted.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub state: ReconcileState,
    /// `None` means wait for the next store event.
    pub requeue_after: Option<Duration>,
    pub error: Option<Error>,
}

impl ReconcileOutcome {
    fn done(state: ReconcileState) -> Self {
        Self {
            state,
            requeue_after: None,
            error: None,
        }
    }

    fn requeue(state: ReconcileState, after: Duration) -> Self {
        Self {
            state,
            requeue_after: Some(after),
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Controller name for a kind, e.g. `managed/autoscalinggroup`.
pub fn controller_name(kind: &str) -> String {
    format!("managed/{}", kind.to_lowercase())
}

/// Everything a kind registers with the engine.
pub struct ControllerOptions<R: Managed> {
    pub name: String,
    pub connector: Arc<dyn Connector<R>>,
    pub hooks: Hooks<R>,
    pub publishers: Vec<Arc<dyn ConnectionPublisher<R>>>,
    pub recorder: Option<Arc<dyn EventRecorder>>,
    /// Overrides the manager-wide poll interval.
    pub poll_interval: Option<Duration>,
}

impl<R: Managed> ControllerOptions<R> {
    pub fn new(connector: Arc<dyn Connector<R>>) -> Self {
        Self {
            name: controller_name(R::KIND),
            connector,
            hooks: Hooks::default(),
            publishers: Vec::new(),
            recorder: None,
            poll_interval: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks<R>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_connection_publishers(
        mut self,
        publishers: Vec<Arc<dyn ConnectionPublisher<R>>>,
    ) -> Self {
        self.publishers = publishers;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

/// Engine-owned changes to an object, replayable onto a newer version.
#[derive(Debug, Default)]
struct StatusPatch {
    conditions: Vec<Condition>,
    external_name: Option<String>,
    at_provider: Option<Option<Value>>,
    add_finalizer: bool,
    remove_finalizer: bool,
    observed_generation: Option<u64>,
}

impl StatusPatch {
    fn between<R: Managed>(original: &R, working: &R) -> Self {
        let conditions = working
            .conditions()
            .iter()
            .filter(|c| !original.conditions().contains(c))
            .cloned()
            .collect();

        let external_name = match (original.external_name(), working.external_name()) {
            (before, Some(after)) if before != Some(after) => Some(after.to_string()),
            _ => None,
        };

        let at_provider = (original.status().at_provider != working.status().at_provider)
            .then(|| working.status().at_provider.clone());

        let had = original.meta().has_finalizer(FINALIZER);
        let has = working.meta().has_finalizer(FINALIZER);

        let observed_generation = (original.status().observed_generation
            != working.status().observed_generation)
            .then_some(working.status().observed_generation);

        Self {
            conditions,
            external_name,
            at_provider,
            add_finalizer: has && !had,
            remove_finalizer: had && !has,
            observed_generation,
        }
    }

    fn is_empty(&self) -> bool {
        self.conditions.is_empty()
            && self.external_name.is_none()
            && self.at_provider.is_none()
            && !self.add_finalizer
            && !self.remove_finalizer
            && self.observed_generation.is_none()
    }

    fn apply<R: Managed>(&self, target: &mut R) -> Result<()> {
        for c in &self.conditions {
            condition::upsert(&mut target.status_mut().conditions, c.clone());
        }
        if let Some(name) = &self.external_name {
            target.set_external_name(name)?;
        }
        if let Some(at_provider) = &self.at_provider {
            target.status_mut().at_provider = at_provider.clone();
        }
        if self.add_finalizer {
            target.meta_mut().add_finalizer(FINALIZER);
        }
        if self.remove_finalizer {
            target.meta_mut().remove_finalizer(FINALIZER);
        }
        if let Some(generation) = self.observed_generation {
            target.status_mut().observed_generation = generation;
        }
        Ok(())
    }
}

/// Reconciles objects of one kind.
pub struct Reconciler<R: Managed> {
    name: String,
    store: Arc<dyn ObjectStore<R>>,
    connector: Arc<dyn Connector<R>>,
    hooks: Hooks<R>,
    publishers: PublisherChain<R>,
    recorder: Arc<dyn EventRecorder>,
    policy: RequeuePolicy,
    timeout: Duration,
    status_update_retries: u32,
    veto_threshold: u32,
    backoff: Backoff<ObjectKey>,
}

impl<R: Managed> Reconciler<R> {
    pub fn new(
        store: Arc<dyn ObjectStore<R>>,
        options: ControllerOptions<R>,
        manager: &ManagerOptions,
    ) -> Self {
        let mut policy = RequeuePolicy::from(manager);
        if let Some(interval) = options.poll_interval {
            policy.poll_interval = interval;
        }
        let recorder = options
            .recorder
            .unwrap_or_else(|| Arc::new(TracingRecorder::new(options.name.clone())));

        Self {
            backoff: Backoff::new(policy.backoff_base, policy.backoff_ceiling),
            name: options.name,
            store,
            connector: options.connector,
            hooks: options.hooks,
            publishers: PublisherChain::new(options.publishers),
            recorder,
            policy,
            timeout: manager.reconcile_timeout,
            status_update_retries: manager.status_update_retries,
            veto_threshold: manager.veto_threshold.max(1),
        }
    }

    /// Use deterministic backoff delays.
    pub fn without_jitter(mut self) -> Self {
        self.backoff = self.backoff.without_jitter();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore<R>> {
        &self.store
    }

    pub fn policy(&self) -> &RequeuePolicy {
        &self.policy
    }

    pub fn backoff(&self) -> &Backoff<ObjectKey> {
        &self.backoff
    }

    /// Run one reconcile for `key`, bounded by the reconcile timeout.
    ///
    /// Never fails: errors are reported on the object and in the outcome.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        let span = info_span!("reconcile", controller = %self.name, object = %key);
        async {
            let outcome = match tokio::time::timeout(self.timeout, self.run(key)).await {
                Ok(outcome) => outcome,
                Err(_) => self.timed_out(key).await,
            };
            debug!(
                state = %outcome.state,
                requeue_after = ?outcome.requeue_after,
                "reconcile finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// Record the timeout on the object. The status write gets its own
    /// deadline so a stuck store cannot hold the worker.
    async fn timed_out(&self, key: &ObjectKey) -> ReconcileOutcome {
        let err = Error::Timeout(self.timeout);
        let record = async {
            match self.store.get(key).await {
                Ok(Some(original)) => {
                    let mut obj = original.clone();
                    obj.set_conditions([Condition::reconcile_error(REASON_RECONCILE_ERROR, &err)]);
                    if let Err(e) = self.persist(&original, &obj).await {
                        warn!(error = %e, "cannot record timeout in status");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "cannot read object after timeout"),
            }
        };
        if tokio::time::timeout(self.timeout, record).await.is_err() {
            warn!(deadline = ?self.timeout, "store did not answer, timeout not recorded in status");
        }
        self.failed(ReconcileState::Unknown, key, err)
    }

    async fn run(&self, key: &ObjectKey) -> ReconcileOutcome {
        let original = match self.store.get(key).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                debug!("object no longer exists");
                self.backoff.forget(key);
                return ReconcileOutcome::done(ReconcileState::Deleted);
            }
            Err(e) => return self.failed(ReconcileState::Unknown, key, e.into()),
        };

        if original.meta().is_deleting() {
            self.delete(original).await
        } else {
            self.sync(original).await
        }
    }

    /// Fresh request from the current spec, shaped by one hook.
    fn request(
        &self,
        obj: &R,
        hook: impl Fn(&R, &mut ExternalRequest) -> Result<()>,
    ) -> Result<ExternalRequest> {
        let mut req = ExternalRequest::for_resource(obj)?;
        hook(obj, &mut req)?;
        Ok(req)
    }

    /// Observe and run the post-observe hook. Drift is computed before the
    /// hook sees the observation.
    async fn observe(&self, obj: &mut R, client: &dyn ExternalClient) -> Result<ExternalObservation> {
        let pre_observe = &self.hooks.pre_observe;
        let req = self.request(obj, |o, r| pre_observe(o, r))?;

        let (observation, err) = match client.observe(&req).await {
            Ok(mut observation) => {
                if observation.resource_exists {
                    let desired = serde_json::to_value(obj.spec())?;
                    observation.drift = diff(&desired, &observation.snapshot);
                    observation.resource_up_to_date = observation.drift.is_empty();
                }
                (observation, None)
            }
            Err(e) => (ExternalObservation::missing(), Some(e)),
        };

        (self.hooks.post_observe)(obj, observation, err)
    }

    async fn sync(&self, original: R) -> ReconcileOutcome {
        let mut original = original;
        let mut obj = original.clone();

        let client = match self.connector.connect(&obj).await {
            Ok(client) => client,
            Err(err) => {
                return self
                    .fail(
                        &original,
                        obj,
                        ReconcileState::Unknown,
                        REASON_RECONCILE_ERROR,
                        recorder::REASON_CANNOT_CONNECT,
                        err,
                    )
                    .await;
            }
        };

        let observation = match self.observe(&mut obj, client.as_ref()).await {
            Ok(observation) => observation,
            Err(err) => {
                return self
                    .fail(
                        &original,
                        obj,
                        ReconcileState::ObserveFailed,
                        REASON_RECONCILE_ERROR,
                        recorder::REASON_CANNOT_OBSERVE,
                        err,
                    )
                    .await;
            }
        };

        if observation.resource_exists {
            // Without a reported name the resource was found under the object name.
            let name = observation.external_name.clone().or_else(|| {
                obj.external_name()
                    .is_none()
                    .then(|| obj.meta().name.clone())
            });
            if let Some(name) = name {
                if let Err(err) = obj.set_external_name(&name) {
                    return self
                        .fail(
                            &original,
                            obj,
                            ReconcileState::Unknown,
                            REASON_RECONCILE_ERROR,
                            recorder::REASON_CANNOT_OBSERVE,
                            err,
                        )
                        .await;
                }
            }
            obj.status_mut().at_provider = Some(observation.snapshot.clone());
        }

        // The finalizer must be stored before anything exists to clean up.
        if obj.meta_mut().add_finalizer(FINALIZER) {
            match self.persist(&original, &obj).await {
                Ok(stored) => {
                    original = stored.clone();
                    obj = stored;
                }
                Err(err) => return self.failed(ReconcileState::Unknown, &obj.key(), err),
            }
        }

        if !observation.resource_exists {
            debug!(state = %ReconcileState::DoesNotExist, "external resource does not exist");
            return self.create(original, obj, client.as_ref()).await;
        }
        if !observation.resource_up_to_date {
            debug!(state = %ReconcileState::ExistsOutOfDate, drift = observation.drift.len(), "external resource is out of date");
            return self.update(original, obj, client.as_ref(), observation).await;
        }
        self.up_to_date(original, obj, observation).await
    }

    async fn create(&self, original: R, mut obj: R, client: &dyn ExternalClient) -> ReconcileOutcome {
        let state = ReconcileState::Creating;
        let pre_create = &self.hooks.pre_create;
        let req = match self.request(&obj, |o, r| pre_create(o, r)) {
            Ok(req) => req,
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_CREATE_FAILED, recorder::REASON_CANNOT_CREATE, err)
                    .await;
            }
        };

        self.backoff.reset_vetoes(&obj.key());
        info!(external_name = req.name(), "creating external resource");
        let creation = match client.create(&req).await {
            Ok(creation) => creation,
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_CREATE_FAILED, recorder::REASON_CANNOT_CREATE, err)
                    .await;
            }
        };

        let external_name = creation
            .external_name
            .clone()
            .unwrap_or_else(|| req.name().to_string());
        if let Err(err) = obj.set_external_name(&external_name) {
            return self
                .fail(&original, obj, state, REASON_CREATE_FAILED, recorder::REASON_CANNOT_CREATE, err)
                .await;
        }

        if let Err(err) = self.publishers.publish(&obj, &creation.connection_details).await {
            return self
                .fail(&original, obj, state, REASON_RECONCILE_ERROR, recorder::REASON_CANNOT_PUBLISH, err)
                .await;
        }

        obj.set_conditions([Condition::reconcile_success(), Condition::creating()]);
        obj.status_mut().observed_generation = obj.meta().generation;
        self.recorder.record(Event::normal(
            R::KIND,
            obj.key(),
            recorder::REASON_CREATED,
            format!("created external resource {}", external_name),
        ));
        self.succeeded(&original, &obj, state, self.policy.post_mutation_wait)
            .await
    }

    async fn update(
        &self,
        original: R,
        mut obj: R,
        client: &dyn ExternalClient,
        observation: ExternalObservation,
    ) -> ReconcileOutcome {
        let state = ReconcileState::Updating;
        let pre_update = &self.hooks.pre_update;
        let req = match self.request(&obj, |o, r| pre_update(o, r)) {
            Ok(req) => req,
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_UPDATE_FAILED, recorder::REASON_CANNOT_UPDATE, err)
                    .await;
            }
        };

        self.backoff.reset_vetoes(&obj.key());
        let drift = observation
            .drift
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        info!(external_name = req.name(), drift = %drift, "updating external resource");

        let update = match client.update(&req, &observation.snapshot).await {
            Ok(update) => update,
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_UPDATE_FAILED, recorder::REASON_CANNOT_UPDATE, err)
                    .await;
            }
        };

        if let Err(err) = self.publishers.publish(&obj, &update.connection_details).await {
            return self
                .fail(&original, obj, state, REASON_RECONCILE_ERROR, recorder::REASON_CANNOT_PUBLISH, err)
                .await;
        }

        obj.set_conditions([Condition::reconcile_success()]);
        obj.status_mut().observed_generation = obj.meta().generation;
        self.recorder.record(Event::normal(
            R::KIND,
            obj.key(),
            recorder::REASON_UPDATED,
            format!("updated external resource: {}", drift),
        ));
        self.succeeded(&original, &obj, state, self.policy.post_mutation_wait)
            .await
    }

    async fn up_to_date(
        &self,
        original: R,
        mut obj: R,
        observation: ExternalObservation,
    ) -> ReconcileOutcome {
        let state = ReconcileState::ExistsUpToDate;
        if let Err(err) = self
            .publishers
            .publish(&obj, &observation.connection_details)
            .await
        {
            return self
                .fail(&original, obj, state, REASON_RECONCILE_ERROR, recorder::REASON_CANNOT_PUBLISH, err)
                .await;
        }

        obj.set_conditions([Condition::reconcile_success()]);
        obj.status_mut().observed_generation = obj.meta().generation;
        self.succeeded(&original, &obj, state, self.policy.poll_interval)
            .await
    }

    async fn delete(&self, original: R) -> ReconcileOutcome {
        let state = ReconcileState::Deleting;
        let key = original.key();
        let mut obj = original.clone();

        if !obj.meta().has_finalizer(FINALIZER) {
            debug!("deletion requested but nothing held by this controller");
            self.backoff.forget(&key);
            return ReconcileOutcome::done(ReconcileState::Deleted);
        }

        let client = match self.connector.connect(&obj).await {
            Ok(client) => client,
            Err(err) => {
                obj.set_conditions([Condition::deleting()]);
                return self
                    .fail(&original, obj, state, REASON_DELETE_FAILED, recorder::REASON_CANNOT_CONNECT, err)
                    .await;
            }
        };

        let observation = self.observe(&mut obj, client.as_ref()).await;
        // Set after post-observe, which may have written its own Ready.
        obj.set_conditions([Condition::deleting()]);
        let observation = match observation {
            Ok(observation) => observation,
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_DELETE_FAILED, recorder::REASON_CANNOT_OBSERVE, err)
                    .await;
            }
        };

        if !observation.resource_exists {
            debug!("external resource already gone");
            return self.release(original, obj).await;
        }

        let mut req = match ExternalRequest::for_resource(&obj) {
            Ok(req) => req,
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_DELETE_FAILED, recorder::REASON_CANNOT_DELETE, err)
                    .await;
            }
        };
        match (self.hooks.pre_delete)(&obj, &mut req) {
            Ok(DeleteDecision::Proceed) => self.backoff.reset_vetoes(&key),
            Ok(DeleteDecision::NotYet(reason)) => {
                return self.vetoed(&original, obj, state, reason).await;
            }
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_DELETE_FAILED, recorder::REASON_CANNOT_DELETE, err)
                    .await;
            }
        }

        info!(external_name = req.name(), "deleting external resource");
        match client.delete(&req).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => debug!("external resource vanished during delete"),
            Err(err) => {
                return self
                    .fail(&original, obj, state, REASON_DELETE_FAILED, recorder::REASON_CANNOT_DELETE, err)
                    .await;
            }
        }

        self.recorder.record(Event::normal(
            R::KIND,
            key,
            recorder::REASON_DELETED,
            format!("deleted external resource {}", req.name()),
        ));
        self.release(original, obj).await
    }

    /// The adapter held the action back. Short requeue, no error, backoff
    /// untouched. Only a run of vetoes shows up on the object.
    async fn vetoed(
        &self,
        original: &R,
        mut obj: R,
        state: ReconcileState,
        reason: String,
    ) -> ReconcileOutcome {
        let key = obj.key();
        let vetoes = self.backoff.record_veto(&key);
        debug!(state = %state, reason = %reason, vetoes, "action postponed by adapter");

        if vetoes >= self.veto_threshold {
            let blocked = match state {
                ReconcileState::Creating => REASON_CREATE_BLOCKED,
                ReconcileState::Updating => REASON_UPDATE_BLOCKED,
                ReconcileState::Deleting => REASON_DELETION_BLOCKED,
                _ => REASON_RECONCILE_BLOCKED,
            };
            obj.set_conditions([Condition::new(
                TYPE_SYNCED,
                ConditionStatus::False,
                blocked,
                Some(reason.clone()),
            )]);
            if vetoes == self.veto_threshold {
                self.recorder.record(Event::warning(
                    R::KIND,
                    key.clone(),
                    recorder::REASON_VETOED,
                    reason,
                ));
            }
        }

        if let Err(err) = self.persist(original, &obj).await {
            return self.failed(state, &key, err);
        }
        ReconcileOutcome::requeue(state, self.policy.veto_wait)
    }

    /// Remove the connection secret and let go of the object.
    async fn release(&self, original: R, mut obj: R) -> ReconcileOutcome {
        let key = obj.key();
        if let Err(err) = self.publishers.unpublish(&obj).await {
            return self
                .fail(
                    &original,
                    obj,
                    ReconcileState::Deleting,
                    REASON_DELETE_FAILED,
                    recorder::REASON_CANNOT_PUBLISH,
                    err,
                )
                .await;
        }

        obj.meta_mut().remove_finalizer(FINALIZER);
        if let Err(err) = self.persist(&original, &obj).await {
            return self.failed(ReconcileState::Deleting, &key, err);
        }
        info!("released object");
        self.backoff.forget(&key);
        ReconcileOutcome::done(ReconcileState::Deleted)
    }

    async fn succeeded(
        &self,
        original: &R,
        obj: &R,
        state: ReconcileState,
        requeue_after: Duration,
    ) -> ReconcileOutcome {
        let key = obj.key();
        if let Err(err) = self.persist(original, obj).await {
            return self.failed(state, &key, err);
        }
        self.backoff.reset(&key);
        ReconcileOutcome::requeue(state, requeue_after)
    }

    /// Report `err` on the object and schedule a retry.
    async fn fail(
        &self,
        original: &R,
        mut obj: R,
        state: ReconcileState,
        reason: &str,
        event_reason: &str,
        err: Error,
    ) -> ReconcileOutcome {
        let err = match err {
            Error::Veto { hook, reason } => {
                debug!(hook, "adapter hook vetoed the action");
                return self.vetoed(original, obj, state, reason).await;
            }
            err => err,
        };
        let key = obj.key();
        let reason = match err.class() {
            ErrorClass::Permanent => REASON_CONTRACT_VIOLATION,
            ErrorClass::Transient | ErrorClass::Veto => reason,
        };
        obj.set_conditions([Condition::reconcile_error(reason, &err)]);
        self.recorder.record(Event::warning(
            R::KIND,
            key.clone(),
            event_reason,
            err.to_string(),
        ));
        if let Err(e) = self.persist(original, &obj).await {
            warn!(error = %e, "cannot record reconcile error in status");
        }
        self.failed(state, &key, err)
    }

    fn failed(&self, state: ReconcileState, key: &ObjectKey, err: Error) -> ReconcileOutcome {
        let delay = match err.class() {
            ErrorClass::Permanent => {
                let delay = self.backoff.ceiling();
                error!(state = %state, error = %err, retry_in = ?delay, "contract violation");
                delay
            }
            ErrorClass::Veto => {
                debug!(state = %state, error = %err, "action vetoed");
                self.policy.veto_wait
            }
            ErrorClass::Transient => {
                let delay = self.backoff.next_delay(key);
                warn!(state = %state, error = %err, retry_in = ?delay, "reconcile failed");
                delay
            }
        };
        ReconcileOutcome {
            state,
            requeue_after: Some(delay),
            error: Some(err),
        }
    }

    /// Write the engine-owned changes in `working` to the store.
    ///
    /// The first attempt uses the version the run started from. On a
    /// version conflict the latest object is read and the same changes are
    /// applied on top of it, so concurrent spec edits survive.
    async fn persist(&self, original: &R, working: &R) -> Result<R> {
        let patch = StatusPatch::between(original, working);
        if patch.is_empty() {
            return Ok(working.clone());
        }

        let key = working.key();
        let mut target = working.clone();
        let mut attempt = 0;
        loop {
            match self.store.update(target).await {
                Ok(stored) => return Ok(stored),
                Err(e) if e.is_conflict() && attempt < self.status_update_retries => {
                    attempt += 1;
                    debug!(attempt, error = %e, "status write conflict, retrying on latest version");
                    target = self
                        .store
                        .get(&key)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
                    patch.apply(&mut target)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
