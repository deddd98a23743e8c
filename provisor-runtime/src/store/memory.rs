//! In-memory ObjectStore with resource versions and finalizer semantics.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::resource::{Managed, ObjectKey};

use super::error::{Result, StoreError};
use super::event::WatchEvent;
use super::traits::ObjectStore;

const EVENT_CAPACITY: usize = 1024;

struct Inner<R> {
    objects: BTreeMap<ObjectKey, R>,
    next_version: u64,
}

impl<R> Inner<R> {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// Process-local store. Good enough for a single-replica host and for tests.
pub struct InMemoryStore<R> {
    inner: RwLock<Inner<R>>,
    events: broadcast::Sender<WatchEvent<R>>,
}

impl<R: Managed> InMemoryStore<R> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                objects: BTreeMap::new(),
                next_version: 0,
            }),
            events,
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn emit(&self, event: WatchEvent<R>) {
        debug!(kind = R::KIND, object = %event.key(), event = event.name(), "store event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl<R: Managed> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Managed> ObjectStore<R> for InMemoryStore<R> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<R>> {
        Ok(self.inner.read().await.objects.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<R>> {
        Ok(self.inner.read().await.objects.values().cloned().collect())
    }

    async fn create(&self, mut obj: R) -> Result<R> {
        let key = obj.key();
        if key.name.is_empty() {
            return Err(StoreError::Internal("object name must not be empty".into()));
        }

        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        let version = inner.bump();
        let meta = obj.meta_mut();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        meta.generation = 1;
        meta.resource_version = version;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;

        inner.objects.insert(key, obj.clone());
        drop(inner);

        self.emit(WatchEvent::Created(obj.clone()));
        Ok(obj)
    }

    async fn update(&self, mut obj: R) -> Result<R> {
        let key = obj.key();
        let mut inner = self.inner.write().await;
        let existing = inner
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let stored_version = existing.meta().resource_version;
        if obj.meta().resource_version != stored_version {
            return Err(StoreError::VersionMismatch {
                key: key.to_string(),
                expected: obj.meta().resource_version,
                actual: stored_version,
            });
        }

        let spec_changed = existing.spec() != obj.spec();
        let generation = existing.meta().generation;
        let uid = existing.meta().uid.clone();
        let created = existing.meta().creation_timestamp;
        // The deletion marker can be set through delete() only and never cleared.
        let deletion = existing.meta().deletion_timestamp;

        let version = inner.bump();
        let meta = obj.meta_mut();
        meta.uid = uid;
        meta.creation_timestamp = created;
        meta.deletion_timestamp = deletion;
        meta.resource_version = version;
        meta.generation = if spec_changed {
            generation + 1
        } else {
            generation
        };

        if obj.meta().is_deleting() && obj.meta().finalizers.is_empty() {
            inner.objects.remove(&key);
            drop(inner);
            self.emit(WatchEvent::Deleted(key));
            return Ok(obj);
        }

        inner.objects.insert(key, obj.clone());
        drop(inner);

        if spec_changed {
            self.emit(WatchEvent::SpecChanged(obj.clone()));
        } else {
            self.emit(WatchEvent::StatusChanged(obj.clone()));
        }
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.objects.get(key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };

        if existing.meta().finalizers.is_empty() {
            inner.objects.remove(key);
            drop(inner);
            self.emit(WatchEvent::Deleted(key.clone()));
            return Ok(());
        }

        if existing.meta().is_deleting() {
            return Ok(());
        }

        let version = inner.bump();
        let Some(obj) = inner.objects.get_mut(key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        obj.meta_mut().deletion_timestamp = Some(Utc::now());
        obj.meta_mut().resource_version = version;
        let obj = obj.clone();
        drop(inner);

        self.emit(WatchEvent::DeletionRequested(obj));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }
}
