//! Connection detail publishing.
//!
//! Publishers merge derived key/value pairs (identifiers, endpoints,
//! credentials) into secret stores. Keys are only ever removed together
//! with the whole secret, when the owning object is deleted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{Managed, SecretRef};

/// Key to opaque value.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// A stored secret and the uid of the object that controls it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub owner_uid: String,
    pub data: ConnectionDetails,
}

/// Durable secret storage.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Merge `data` into the secret, creating it if needed. Fails if the
    /// secret exists and is controlled by another owner. Returns whether
    /// anything changed.
    async fn put(&self, secret: &SecretRef, owner_uid: &str, data: &ConnectionDetails)
    -> Result<bool>;

    async fn get(&self, secret: &SecretRef) -> Result<Option<Secret>>;

    /// Remove the secret. Missing secrets are not an error.
    async fn delete(&self, secret: &SecretRef, owner_uid: &str) -> Result<()>;
}

/// Process-local secret store.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<SecretRef, Secret>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn put(
        &self,
        secret: &SecretRef,
        owner_uid: &str,
        data: &ConnectionDetails,
    ) -> Result<bool> {
        let mut secrets = self.secrets.write().await;
        let entry = secrets.entry(secret.clone()).or_insert_with(|| Secret {
            owner_uid: owner_uid.to_string(),
            data: ConnectionDetails::new(),
        });

        if entry.owner_uid != owner_uid {
            return Err(Error::publish(format!(
                "secret {} is controlled by another object",
                secret
            )));
        }

        let mut changed = false;
        for (k, v) in data {
            if entry.data.get(k) != Some(v) {
                entry.data.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        Ok(changed)
    }

    async fn get(&self, secret: &SecretRef) -> Result<Option<Secret>> {
        Ok(self.secrets.read().await.get(secret).cloned())
    }

    async fn delete(&self, secret: &SecretRef, owner_uid: &str) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        match secrets.get(secret) {
            Some(existing) if existing.owner_uid != owner_uid => Err(Error::publish(format!(
                "refusing to delete secret {} controlled by another object",
                secret
            ))),
            Some(_) => {
                secrets.remove(secret);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Writes and removes an object's connection details.
#[async_trait]
pub trait ConnectionPublisher<R: Managed>: Send + Sync {
    /// Merge `details` into the object's secret. Returns whether anything
    /// was written.
    async fn publish_connection(&self, obj: &R, details: &ConnectionDetails) -> Result<bool>;

    /// Remove the object's secret entirely.
    async fn unpublish_connection(&self, obj: &R) -> Result<()>;
}

/// Publishes into a [`SecretStore`], at the secret the object points to.
///
/// With a scope set, the secret is written under that namespace instead of
/// the one named by the object; this is how an external store keeps all of
/// a provider's secrets in one place.
pub struct SecretStorePublisher {
    store: Arc<dyn SecretStore>,
    scope: Option<String>,
}

impl SecretStorePublisher {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store, scope: None }
    }

    pub fn scoped(store: Arc<dyn SecretStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: Some(scope.into()),
        }
    }

    fn target(&self, secret: &SecretRef) -> SecretRef {
        match &self.scope {
            Some(scope) => SecretRef::new(scope.clone(), secret.name.clone()),
            None => secret.clone(),
        }
    }
}

#[async_trait]
impl<R: Managed> ConnectionPublisher<R> for SecretStorePublisher {
    async fn publish_connection(&self, obj: &R, details: &ConnectionDetails) -> Result<bool> {
        let Some(secret) = obj.connection_secret_ref() else {
            return Ok(false);
        };
        if details.is_empty() {
            return Ok(false);
        }
        let target = self.target(secret);
        let changed = self.store.put(&target, &obj.meta().uid, details).await?;
        if changed {
            debug!(object = %obj.key(), secret = %target, keys = details.len(), "published connection details");
        }
        Ok(changed)
    }

    async fn unpublish_connection(&self, obj: &R) -> Result<()> {
        let Some(secret) = obj.connection_secret_ref() else {
            return Ok(());
        };
        let target = self.target(secret);
        self.store.delete(&target, &obj.meta().uid).await?;
        debug!(object = %obj.key(), secret = %target, "removed connection secret");
        Ok(())
    }
}

/// Ordered set of publishers. The first failure stops the chain.
pub struct PublisherChain<R> {
    publishers: Vec<Arc<dyn ConnectionPublisher<R>>>,
}

impl<R: Managed> PublisherChain<R> {
    pub fn new(publishers: Vec<Arc<dyn ConnectionPublisher<R>>>) -> Self {
        Self { publishers }
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    pub async fn publish(&self, obj: &R, details: &ConnectionDetails) -> Result<bool> {
        let mut published = false;
        for publisher in &self.publishers {
            published |= publisher.publish_connection(obj, details).await?;
        }
        Ok(published)
    }

    pub async fn unpublish(&self, obj: &R) -> Result<()> {
        for publisher in &self.publishers {
            publisher.unpublish_connection(obj).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::Widget;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn details(pairs: &[(&str, &str)]) -> ConnectionDetails {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn widget_with_secret() -> Widget {
        let mut w = Widget::new("w", 1);
        w.meta.uid = "uid-1".into();
        w.secret = Some(SecretRef::new("default", "w-conn"));
        w
    }

    #[tokio::test]
    async fn test_publish_merges_additively() {
        let store = Arc::new(InMemorySecretStore::new());
        let publisher = SecretStorePublisher::new(store.clone());
        let w = widget_with_secret();

        publisher
            .publish_connection(&w, &details(&[("arn", "arn-1"), ("name", "asg")]))
            .await
            .unwrap();
        publisher
            .publish_connection(&w, &details(&[("endpoint", "e")]))
            .await
            .unwrap();

        let secret = store
            .get(&SecretRef::new("default", "w-conn"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret.data.len(), 3);
        assert_eq!(secret.data["arn"], b"arn-1".to_vec());
    }

    #[tokio::test]
    async fn test_publish_without_ref_is_noop() {
        let store = Arc::new(InMemorySecretStore::new());
        let publisher = SecretStorePublisher::new(store.clone());
        let w = Widget::new("w", 1);

        let published = publisher
            .publish_connection(&w, &details(&[("arn", "x")]))
            .await
            .unwrap();
        assert!(!published);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_secret_owned_by_other_object_is_refused() {
        let store = Arc::new(InMemorySecretStore::new());
        let publisher = SecretStorePublisher::new(store.clone());
        let w = widget_with_secret();
        publisher
            .publish_connection(&w, &details(&[("arn", "x")]))
            .await
            .unwrap();

        let mut other = widget_with_secret();
        other.meta.uid = "uid-2".into();
        let err = publisher
            .publish_connection(&other, &details(&[("arn", "y")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
    }

    #[tokio::test]
    async fn test_scoped_publisher_and_unpublish() {
        let store = Arc::new(InMemorySecretStore::new());
        let publisher = SecretStorePublisher::scoped(store.clone(), "vault");
        let w = widget_with_secret();

        publisher
            .publish_connection(&w, &details(&[("arn", "x")]))
            .await
            .unwrap();
        assert!(
            store
                .get(&SecretRef::new("vault", "w-conn"))
                .await
                .unwrap()
                .is_some()
        );

        ConnectionPublisher::<Widget>::unpublish_connection(&publisher, &w)
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    struct Failing;

    #[async_trait]
    impl ConnectionPublisher<Widget> for Failing {
        async fn publish_connection(&self, _: &Widget, _: &ConnectionDetails) -> Result<bool> {
            Err(Error::publish("store unavailable"))
        }

        async fn unpublish_connection(&self, _: &Widget) -> Result<()> {
            Err(Error::publish("store unavailable"))
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl ConnectionPublisher<Widget> for Counting {
        async fn publish_connection(&self, _: &Widget, _: &ConnectionDetails) -> Result<bool> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn unpublish_connection(&self, _: &Widget) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_failure() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let chain = PublisherChain::new(vec![
            counting.clone() as Arc<dyn ConnectionPublisher<Widget>>,
            Arc::new(Failing),
            counting.clone(),
        ]);
        let w = widget_with_secret();

        assert!(chain.publish(&w, &details(&[("a", "b")])).await.is_err());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);

        assert!(chain.unpublish(&w).await.is_err());
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }
}
