//! provisor-runtime: drives external resources to the state described by
//! stored objects.
//!
//! A resource kind plugs in by implementing [`Managed`] for its object type,
//! a [`Connector`] and [`ExternalClient`] for its provider, and optionally a
//! set of [`Hooks`]. The [`Manager`] runs every registered kind on one worker
//! pool.

pub mod condition;
pub mod config;
pub mod connection;
pub mod diff;
pub mod error;
pub mod external;
pub mod hooks;
pub mod manager;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod resource;
pub mod scheduler;
pub mod store;

pub use condition::{Condition, ConditionStatus, get_condition, set_condition};
pub use config::{Feature, Features, ManagerOptions};
pub use connection::{
    ConnectionDetails, ConnectionPublisher, InMemorySecretStore, PublisherChain, SecretStore,
    SecretStorePublisher,
};
pub use error::{Error, ErrorClass, Result};
pub use external::{
    Connector, ExternalClient, ExternalCreation, ExternalObservation, ExternalRequest,
    ExternalUpdate,
};
pub use hooks::{DeleteDecision, Hooks};
pub use manager::{Controller, Manager, QueueKey, Registry};
pub use queue::WorkQueue;
pub use reconciler::{
    ControllerOptions, ReconcileOutcome, ReconcileState, Reconciler, controller_name,
};
pub use recorder::{Event, EventRecorder, EventType, MemoryRecorder, TracingRecorder};
pub use resource::{
    EXTERNAL_NAME_ANNOTATION, FINALIZER, Managed, ObjectKey, ObjectMeta, ResourceStatus,
    SecretRef,
};
pub use store::{InMemoryStore, ObjectStore, StoreError, WatchEvent};
