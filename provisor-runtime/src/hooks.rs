//! Adapter hook slots.
//!
//! A resource kind customizes the engine through these five callbacks. Every
//! slot defaults to a no-op, so an adapter only fills in what it needs.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::external::{ExternalObservation, ExternalRequest};
use crate::resource::Managed;

/// What the pre-delete hook decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteDecision {
    /// Go ahead and delete the external resource.
    Proceed,
    /// Not yet (e.g. dependents still attached). Retried shortly.
    NotYet(String),
}

pub type PreObserveFn<R> = Arc<dyn Fn(&R, &mut ExternalRequest) -> Result<()> + Send + Sync>;
pub type PostObserveFn<R> = Arc<
    dyn Fn(&mut R, ExternalObservation, Option<Error>) -> Result<ExternalObservation>
        + Send
        + Sync,
>;
pub type PreCreateFn<R> = Arc<dyn Fn(&R, &mut ExternalRequest) -> Result<()> + Send + Sync>;
pub type PreUpdateFn<R> = Arc<dyn Fn(&R, &mut ExternalRequest) -> Result<()> + Send + Sync>;
pub type PreDeleteFn<R> =
    Arc<dyn Fn(&R, &mut ExternalRequest) -> Result<DeleteDecision> + Send + Sync>;

/// Named callback slots handed to the reconciler.
pub struct Hooks<R> {
    /// Shape the lookup request, e.g. set the lookup key from the external name.
    pub pre_observe: PreObserveFn<R>,
    /// Inspect the observation. Receives the observe error, if any, and
    /// returns the observation (or error) the engine should act on. May set
    /// extra conditions on the object.
    pub post_observe: PostObserveFn<R>,
    /// Shape the create request. [`Error::veto`] holds the create back until
    /// a later run; any other error fails the run.
    pub pre_create: PreCreateFn<R>,
    /// Shape the update request. Errors are handled as for `pre_create`.
    pub pre_update: PreUpdateFn<R>,
    /// Shape the delete request and decide whether to delete now.
    /// `Err(Error::veto(..))` counts as [`DeleteDecision::NotYet`].
    pub pre_delete: PreDeleteFn<R>,
}

impl<R: Managed> Hooks<R> {
    pub fn new() -> Self {
        Self {
            pre_observe: Arc::new(|_: &R, _: &mut ExternalRequest| -> Result<()> { Ok(()) }),
            post_observe: Arc::new(
                |_: &mut R,
                 observation: ExternalObservation,
                 err: Option<Error>|
                 -> Result<ExternalObservation> {
                    match err {
                        Some(err) => Err(err),
                        None => Ok(observation),
                    }
                },
            ),
            pre_create: Arc::new(|_: &R, _: &mut ExternalRequest| -> Result<()> { Ok(()) }),
            pre_update: Arc::new(|_: &R, _: &mut ExternalRequest| -> Result<()> { Ok(()) }),
            pre_delete: Arc::new(
                |_: &R, _: &mut ExternalRequest| -> Result<DeleteDecision> {
                    Ok(DeleteDecision::Proceed)
                },
            ),
        }
    }

    pub fn with_pre_observe(
        mut self,
        f: impl Fn(&R, &mut ExternalRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_observe = Arc::new(f);
        self
    }

    pub fn with_post_observe(
        mut self,
        f: impl Fn(&mut R, ExternalObservation, Option<Error>) -> Result<ExternalObservation>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.post_observe = Arc::new(f);
        self
    }

    pub fn with_pre_create(
        mut self,
        f: impl Fn(&R, &mut ExternalRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_create = Arc::new(f);
        self
    }

    pub fn with_pre_update(
        mut self,
        f: impl Fn(&R, &mut ExternalRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_update = Arc::new(f);
        self
    }

    pub fn with_pre_delete(
        mut self,
        f: impl Fn(&R, &mut ExternalRequest) -> Result<DeleteDecision> + Send + Sync + 'static,
    ) -> Self {
        self.pre_delete = Arc::new(f);
        self
    }
}

impl<R: Managed> Default for Hooks<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for Hooks<R> {
    fn clone(&self) -> Self {
        Self {
            pre_observe: Arc::clone(&self.pre_observe),
            post_observe: Arc::clone(&self.post_observe),
            pre_create: Arc::clone(&self.pre_create),
            pre_update: Arc::clone(&self.pre_update),
            pre_delete: Arc::clone(&self.pre_delete),
        }
    }
}

impl<R> fmt::Debug for Hooks<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
