//! ObjectStore trait definition.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::resource::{Managed, ObjectKey};

use super::error::Result;
use super::event::WatchEvent;

/// Durable storage for one managed kind.
#[async_trait]
pub trait ObjectStore<R: Managed>: Send + Sync {
    /// Get an object by key.
    async fn get(&self, key: &ObjectKey) -> Result<Option<R>>;

    /// List all objects of this kind.
    async fn list(&self) -> Result<Vec<R>>;

    /// Create a new object. Assigns uid, generation and resource version.
    async fn create(&self, obj: R) -> Result<R>;

    /// Replace an object.
    ///
    /// Fails with `VersionMismatch` when `obj` was read at an older
    /// `resource_version`. A deletion-marked object whose last finalizer is
    /// released is removed from the store.
    async fn update(&self, obj: R) -> Result<R>;

    /// Request deletion. Objects without finalizers go away immediately;
    /// otherwise only the deletion marker is set.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to change events.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>>;
}
