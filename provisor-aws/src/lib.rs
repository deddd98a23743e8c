//! provisor-aws: AWS managed resources on top of provisor-runtime.
//!
//! Every kind gets a `setup_*` function that registers its controller with a
//! [`Registry`](provisor_runtime::Registry). The provider talks to a simulated
//! autoscaling API (see [`cloud`]).

pub mod autoscaling;
pub mod cloud;

use std::sync::Arc;

use provisor_runtime::{InMemorySecretStore, ManagerOptions, SecretStore};

pub use autoscaling::{AutoScalingGroup, AutoScalingGroupParameters, setup_autoscaling_group};
pub use cloud::AutoScalingCloud;

/// Namespace connection secrets land in on the external store.
pub const DEFAULT_EXTERNAL_STORE_SCOPE: &str = "provisor-system";

/// Handles shared by every controller of this provider.
pub struct ProviderContext {
    pub cloud: AutoScalingCloud,
    /// Used when an object does not set its own region.
    pub default_region: Option<String>,
    pub secret_store: Arc<dyn SecretStore>,
    /// Only written to with `EnableAlphaExternalSecretStores`.
    pub external_secret_store: Arc<dyn SecretStore>,
    pub external_store_scope: String,
    pub options: ManagerOptions,
}

impl ProviderContext {
    /// Context backed by in-memory secret stores.
    pub fn new(cloud: AutoScalingCloud, options: ManagerOptions) -> Self {
        Self {
            cloud,
            default_region: None,
            secret_store: Arc::new(InMemorySecretStore::new()),
            external_secret_store: Arc::new(InMemorySecretStore::new()),
            external_store_scope: DEFAULT_EXTERNAL_STORE_SCOPE.to_string(),
            options,
        }
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = Some(region.into());
        self
    }
}
