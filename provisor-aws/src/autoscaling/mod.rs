//! AutoScalingGroup managed resource.

pub mod external;

use std::sync::Arc;

use provisor_runtime::store::ObjectStore;
use provisor_runtime::{
    Condition, ConnectionPublisher, ControllerOptions, DeleteDecision, Error, ExternalObservation,
    ExternalRequest, Feature, Hooks, Managed, ObjectMeta, Reconciler, Registry, ResourceStatus,
    Result, SecretRef, SecretStorePublisher, TracingRecorder, controller_name,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::ProviderContext;
pub use external::AutoScalingConnector;

/// Request field the describe call looks groups up by.
pub const FIELD_GROUP_NAMES: &str = "autoScalingGroupNames";
/// Request field naming the group for create, update and delete.
pub const FIELD_GROUP_NAME: &str = "autoScalingGroupName";

/// Desired configuration of an Auto Scaling Group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroupParameters {
    /// Falls back to the provider's default region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub min_size: i64,
    pub max_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_capacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroup {
    pub metadata: ObjectMeta,
    pub spec: AutoScalingGroupParameters,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretRef>,
}

impl AutoScalingGroup {
    pub fn new(meta: ObjectMeta, spec: AutoScalingGroupParameters) -> Self {
        Self {
            metadata: meta,
            spec,
            status: ResourceStatus::default(),
            write_connection_secret_to_ref: None,
        }
    }

    pub fn with_connection_secret(mut self, secret: SecretRef) -> Self {
        self.write_connection_secret_to_ref = Some(secret);
        self
    }
}

impl Managed for AutoScalingGroup {
    type Spec = AutoScalingGroupParameters;
    const KIND: &'static str = "AutoScalingGroup";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn spec(&self) -> &AutoScalingGroupParameters {
        &self.spec
    }
    fn status(&self) -> &ResourceStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut ResourceStatus {
        &mut self.status
    }
    fn connection_secret_ref(&self) -> Option<&SecretRef> {
        self.write_connection_secret_to_ref.as_ref()
    }
}

/// The group name on the provider side: the external name, or the object
/// name before one is assigned.
fn group_name(cr: &AutoScalingGroup) -> String {
    cr.external_name()
        .unwrap_or(&cr.metadata.name)
        .to_string()
}

fn pre_observe(cr: &AutoScalingGroup, req: &mut ExternalRequest) -> Result<()> {
    req.set(FIELD_GROUP_NAMES, json!([group_name(cr)]));
    Ok(())
}

fn post_observe(
    cr: &mut AutoScalingGroup,
    obs: ExternalObservation,
    err: Option<Error>,
) -> Result<ExternalObservation> {
    if let Some(err) = err {
        return Err(err);
    }
    if obs.resource_exists {
        cr.set_conditions([Condition::available()]);
    }
    Ok(obs)
}

fn pre_create(cr: &AutoScalingGroup, req: &mut ExternalRequest) -> Result<()> {
    req.set(FIELD_GROUP_NAME, group_name(cr));
    Ok(())
}

fn pre_update(cr: &AutoScalingGroup, req: &mut ExternalRequest) -> Result<()> {
    req.set(FIELD_GROUP_NAME, group_name(cr));
    Ok(())
}

fn pre_delete(cr: &AutoScalingGroup, req: &mut ExternalRequest) -> Result<DeleteDecision> {
    req.set(FIELD_GROUP_NAME, group_name(cr));
    Ok(DeleteDecision::Proceed)
}

pub fn hooks() -> Hooks<AutoScalingGroup> {
    Hooks::new()
        .with_pre_observe(pre_observe)
        .with_post_observe(post_observe)
        .with_pre_create(pre_create)
        .with_pre_update(pre_update)
        .with_pre_delete(pre_delete)
}

/// Build the AutoScalingGroup controller and add it to `registry`.
pub fn setup_autoscaling_group(
    registry: &mut Registry,
    store: Arc<dyn ObjectStore<AutoScalingGroup>>,
    ctx: &ProviderContext,
) -> Result<()> {
    let name = controller_name(AutoScalingGroup::KIND);

    let mut publishers: Vec<Arc<dyn ConnectionPublisher<AutoScalingGroup>>> = vec![Arc::new(
        SecretStorePublisher::new(Arc::clone(&ctx.secret_store)),
    )];
    if ctx
        .options
        .features
        .enabled(Feature::EnableAlphaExternalSecretStores)
    {
        info!(controller = %name, scope = %ctx.external_store_scope, "external secret store publishing enabled");
        publishers.push(Arc::new(SecretStorePublisher::scoped(
            Arc::clone(&ctx.external_secret_store),
            ctx.external_store_scope.clone(),
        )));
    }

    let connector = AutoScalingConnector::new(ctx.cloud.clone(), ctx.default_region.clone());
    let options = ControllerOptions::<AutoScalingGroup>::new(Arc::new(connector))
        .with_name(name.clone())
        .with_hooks(hooks())
        .with_poll_interval(ctx.options.poll_interval)
        .with_connection_publishers(publishers)
        .with_recorder(Arc::new(TracingRecorder::new(name)));

    registry.register(Arc::new(Reconciler::new(store, options, &ctx.options)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisor_runtime::condition::TYPE_READY;

    fn group() -> AutoScalingGroup {
        AutoScalingGroup::new(
            ObjectMeta::namespaced("default", "web"),
            AutoScalingGroupParameters {
                region: Some("us-east-1".to_string()),
                min_size: 1,
                max_size: 3,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_hooks_use_object_name_before_external_name() {
        let cr = group();
        let mut req = ExternalRequest::for_resource(&cr).unwrap();
        pre_observe(&cr, &mut req).unwrap();
        assert_eq!(req.get(FIELD_GROUP_NAMES), Some(&json!(["web"])));

        pre_create(&cr, &mut req).unwrap();
        assert_eq!(req.get_str(FIELD_GROUP_NAME), Some("web"));
    }

    #[test]
    fn test_hooks_use_external_name() {
        let mut cr = group();
        cr.set_external_name("web-asg").unwrap();
        let mut req = ExternalRequest::for_resource(&cr).unwrap();

        pre_update(&cr, &mut req).unwrap();
        assert_eq!(req.get_str(FIELD_GROUP_NAME), Some("web-asg"));
        assert_eq!(pre_delete(&cr, &mut req).unwrap(), DeleteDecision::Proceed);
        assert_eq!(req.get_str(FIELD_GROUP_NAME), Some("web-asg"));
    }

    #[test]
    fn test_post_observe_sets_available() {
        let mut cr = group();
        let obs = post_observe(&mut cr, ExternalObservation::exists(json!({})), None).unwrap();
        assert!(obs.resource_exists);
        assert!(cr.get_condition(TYPE_READY).is_true());
    }

    #[test]
    fn test_post_observe_leaves_missing_group_alone() {
        let mut cr = group();
        post_observe(&mut cr, ExternalObservation::missing(), None).unwrap();
        assert!(cr.conditions().is_empty());
    }

    #[test]
    fn test_post_observe_propagates_error() {
        let mut cr = group();
        let err = post_observe(
            &mut cr,
            ExternalObservation::missing(),
            Some(Error::throttled("slow down")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Throttled(_)));
        assert!(cr.conditions().is_empty());
    }

    #[test]
    fn test_manifest_shape() {
        let cr: AutoScalingGroup = serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"minSize": 1, "maxSize": 4, "availabilityZones": ["us-east-1a"]},
            "writeConnectionSecretToRef": {"namespace": "default", "name": "web-conn"}
        }))
        .unwrap();
        assert_eq!(cr.spec.max_size, 4);
        assert_eq!(cr.spec.region, None);
        assert_eq!(
            cr.connection_secret_ref(),
            Some(&SecretRef::new("default", "web-conn"))
        );
    }
}
