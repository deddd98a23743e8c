//! Managed resource model.
//!
//! Every resource kind the engine reconciles implements [`Managed`]. The
//! engine only touches metadata and status; the spec belongs to the user.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::{self, Condition};
use crate::error::{Error, Result};

/// Annotation holding the provider-assigned identifier.
pub const EXTERNAL_NAME_ANNOTATION: &str = "provisor.io/external-name";

/// Finalizer held by the engine until the external resource is gone.
pub const FINALIZER: &str = "finalizer.managedresource.provisor.io";

/// Identity of an object in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Object metadata, owned by the store and the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Assigned by the store on create.
    pub uid: String,
    /// Bumped by the store whenever the spec changes.
    pub generation: u64,
    /// Bumped by the store on every write. Used for optimistic concurrency.
    pub resource_version: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Deletion marker. Once set it is never cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true if the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns true if the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }
}

/// Status section shared by every managed kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceStatus {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Snapshot from the last successful observation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_provider: Option<serde_json::Value>,
    /// Generation the last successful reconcile worked from.
    pub observed_generation: u64,
}

/// Where connection details for an object are written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl SecretRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A desired-state object the engine can reconcile.
///
/// Implement this once per resource kind. The provided methods carry the
/// engine's invariants (external-name stability, condition upserts) and
/// should not be overridden.
pub trait Managed: Clone + fmt::Debug + Send + Sync + 'static {
    /// The user's desired configuration. Serialized field names must match
    /// the ones the external client reports in its snapshot.
    type Spec: serde::Serialize + Clone + PartialEq + Send + Sync;

    /// Kind name, e.g. `AutoScalingGroup`.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> &ResourceStatus;
    fn status_mut(&mut self) -> &mut ResourceStatus;

    /// Secret receiving connection details, if the user asked for one.
    fn connection_secret_ref(&self) -> Option<&SecretRef> {
        None
    }

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    fn external_name(&self) -> Option<&str> {
        self.meta()
            .annotations
            .get(EXTERNAL_NAME_ANNOTATION)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Attach the provider identifier.
    ///
    /// Returns whether the annotation changed. Setting the same value again is
    /// a no-op; setting a different value is refused.
    fn set_external_name(&mut self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Err(Error::contract("provider returned an empty external name"));
        }
        match self.external_name() {
            Some(current) if current == name => Ok(false),
            Some(current) => Err(Error::ExternalNameConflict {
                current: current.to_string(),
                requested: name.to_string(),
            }),
            None => {
                self.meta_mut()
                    .annotations
                    .insert(EXTERNAL_NAME_ANNOTATION.to_string(), name.to_string());
                Ok(true)
            }
        }
    }

    fn conditions(&self) -> &[Condition] {
        &self.status().conditions
    }

    /// Upsert conditions. Returns whether anything changed.
    fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) -> bool {
        let mut changed = false;
        for c in conditions {
            changed |= condition::upsert(&mut self.status_mut().conditions, c);
        }
        changed
    }

    fn get_condition(&self, type_: &str) -> Condition {
        condition::get_condition(self, type_)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Widget;
    use super::*;
    use crate::condition::{ConditionStatus, TYPE_READY, TYPE_SYNCED};

    #[test]
    fn test_external_name_is_stable() {
        let mut w = Widget::new("w", 1);
        assert_eq!(w.external_name(), None);

        assert!(w.set_external_name("asg-1").unwrap());
        assert!(!w.set_external_name("asg-1").unwrap());

        let err = w.set_external_name("asg-2").unwrap_err();
        assert!(matches!(err, Error::ExternalNameConflict { .. }));
        assert_eq!(w.external_name(), Some("asg-1"));
    }

    #[test]
    fn test_empty_external_name_rejected() {
        let mut w = Widget::new("w", 1);
        assert!(w.set_external_name("").is_err());
        assert_eq!(w.external_name(), None);
    }

    #[test]
    fn test_finalizers() {
        let mut meta = ObjectMeta::new("w");
        assert!(meta.add_finalizer(FINALIZER));
        assert!(!meta.add_finalizer(FINALIZER));
        assert!(meta.has_finalizer(FINALIZER));
        assert!(meta.remove_finalizer(FINALIZER));
        assert!(!meta.remove_finalizer(FINALIZER));
    }

    #[test]
    fn test_absent_condition_reads_unknown() {
        let mut w = Widget::new("w", 1);
        assert_eq!(w.get_condition(TYPE_SYNCED).status, ConditionStatus::Unknown);

        w.set_conditions([Condition::available()]);
        assert_eq!(w.get_condition(TYPE_READY).status, ConditionStatus::True);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ObjectKey::namespaced("prod", "asg").to_string(), "prod/asg");
        assert_eq!(ObjectKey::new("asg").to_string(), "asg");
    }
}
