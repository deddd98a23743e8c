//! Contract between the engine and a resource kind's provider client.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::connection::ConnectionDetails;
use crate::diff::Drift;
use crate::error::{Error, Result};
use crate::resource::Managed;

/// Provider-agnostic request handed to the external client.
///
/// The engine renders the spec into `fields`; adapter hooks then shape it
/// (set lookup keys, rename fields) before the client maps it onto the
/// provider API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalRequest {
    pub object_name: String,
    pub external_name: Option<String>,
    pub fields: Map<String, Value>,
}

impl ExternalRequest {
    /// Build a fresh request from the object's current spec.
    pub fn for_resource<R: Managed>(obj: &R) -> Result<Self> {
        let fields = match serde_json::to_value(obj.spec())? {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(Error::contract(format!(
                    "{} spec must serialize to an object, got {}",
                    R::KIND,
                    other
                )));
            }
        };
        Ok(Self {
            object_name: obj.meta().name.clone(),
            external_name: obj.external_name().map(str::to_string),
            fields,
        })
    }

    /// The identifier to address the external resource with: the external
    /// name once known, the object name before that.
    pub fn name(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.object_name)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// The fields as one JSON object, for clients that deserialize a typed
    /// provider input from it.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Result of looking the external resource up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalObservation {
    pub resource_exists: bool,
    /// Filled in by the engine from the drift list; post-observe hooks may
    /// override it.
    pub resource_up_to_date: bool,
    /// The provider's view of the resource, keyed like the spec.
    pub snapshot: Value,
    /// Identifier reported by the provider, attached on first match.
    pub external_name: Option<String>,
    pub connection_details: ConnectionDetails,
    /// Fields where spec and snapshot disagree.
    pub drift: Vec<Drift>,
}

impl ExternalObservation {
    /// The provider has no such resource.
    pub fn missing() -> Self {
        Self::default()
    }

    /// The provider returned `snapshot` for the resource.
    pub fn exists(snapshot: Value) -> Self {
        Self {
            resource_exists: true,
            snapshot,
            ..Default::default()
        }
    }

    pub fn with_external_name(mut self, name: impl Into<String>) -> Self {
        self.external_name = Some(name.into());
        self
    }

    pub fn with_connection_details(mut self, details: ConnectionDetails) -> Self {
        self.connection_details = details;
        self
    }
}

/// Result of a successful create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalCreation {
    /// Provider-assigned identifier, if the provider assigns one.
    pub external_name: Option<String>,
    pub connection_details: ConnectionDetails,
}

/// Result of a successful update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalUpdate {
    pub connection_details: ConnectionDetails,
}

/// Per-kind client talking to the provider.
///
/// Calls may be abandoned mid-flight when the reconcile deadline passes, so
/// implementations must tolerate being dropped at any await point.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    async fn observe(&self, req: &ExternalRequest) -> Result<ExternalObservation>;

    async fn create(&self, req: &ExternalRequest) -> Result<ExternalCreation>;

    async fn update(&self, req: &ExternalRequest, snapshot: &Value) -> Result<ExternalUpdate>;

    /// Delete the resource. Return [`Error::NotFound`] (or succeed) when it
    /// is already gone.
    async fn delete(&self, req: &ExternalRequest) -> Result<()>;
}

/// Produces an [`ExternalClient`] bound to one object (credentials, region).
#[async_trait]
pub trait Connector<R: Managed>: Send + Sync {
    async fn connect(&self, obj: &R) -> Result<Box<dyn ExternalClient>>;
}
