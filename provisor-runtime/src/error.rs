//! Error types for the reconciliation engine.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// How the scheduler should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Throttling, timeouts, eventual consistency. Retried with backoff.
    Transient,
    /// The adapter or the object breaks the engine contract. Retrying will
    /// not converge until someone changes code or spec.
    Permanent,
    /// An adapter hook held the action back. Not a failure; retried shortly.
    Veto,
}

/// Errors produced while reconciling a managed resource.
#[derive(Debug, Error)]
pub enum Error {
    /// The connector could not produce an external client.
    #[error("cannot connect to provider: {0}")]
    Connect(String),

    /// The provider rejected or failed a call.
    #[error("provider error: {0}")]
    Provider(String),

    /// The external resource does not exist. Delete treats this as success.
    #[error("external resource not found: {0}")]
    NotFound(String),

    /// The provider asked us to slow down.
    #[error("request throttled: {0}")]
    Throttled(String),

    /// The reconcile deadline elapsed before the run finished.
    #[error("reconcile deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// An adapter hook asked to skip this run's action for now, e.g. while
    /// dependents are still attached.
    #[error("{hook} hook vetoed the action: {reason}")]
    Veto { hook: &'static str, reason: String },

    /// A connection publisher failed.
    #[error("cannot publish connection details: {0}")]
    Publish(String),

    /// Something tried to replace an already assigned external name.
    #[error("external name is already {current}, refusing to change it to {requested}")]
    ExternalNameConflict { current: String, requested: String },

    /// The adapter returned something the engine cannot work with.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Invalid engine or registry configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The spec could not be rendered to a request.
    #[error("cannot serialize spec: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Durable object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect(reason.into())
    }

    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn throttled(reason: impl Into<String>) -> Self {
        Self::Throttled(reason.into())
    }

    pub fn veto(hook: &'static str, reason: impl Into<String>) -> Self {
        Self::Veto {
            hook,
            reason: reason.into(),
        }
    }

    pub fn publish(reason: impl Into<String>) -> Self {
        Self::Publish(reason.into())
    }

    pub fn contract(reason: impl Into<String>) -> Self {
        Self::Contract(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Whether this error carries the "resource is gone" marker.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify the error for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ExternalNameConflict { .. }
            | Self::Contract(_)
            | Self::Config(_)
            | Self::Serialize(_) => ErrorClass::Permanent,
            Self::Veto { .. } => ErrorClass::Veto,
            _ => ErrorClass::Transient,
        }
    }
}
