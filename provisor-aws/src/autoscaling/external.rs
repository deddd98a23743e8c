//! Connector and external client mapping engine calls onto the autoscaling API.

use async_trait::async_trait;
use provisor_runtime::{
    ConnectionDetails, Connector, Error, ExternalClient, ExternalCreation, ExternalObservation,
    ExternalRequest, ExternalUpdate, Result,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::AutoScalingGroup;
use crate::cloud::{
    AutoScalingApi, AutoScalingCloud, AutoScalingGroupDescription, CloudError,
    CreateAutoScalingGroupInput, DeleteAutoScalingGroupInput, DescribeAutoScalingGroupsInput,
    UpdateAutoScalingGroupInput,
};

/// Connection detail keys published for every group.
pub const DETAIL_NAME: &str = "autoScalingGroupName";
pub const DETAIL_ARN: &str = "autoScalingGroupARN";
pub const DETAIL_REGION: &str = "region";

/// Hands out clients bound to the group's region.
pub struct AutoScalingConnector {
    cloud: AutoScalingCloud,
    default_region: Option<String>,
}

impl AutoScalingConnector {
    pub fn new(cloud: AutoScalingCloud, default_region: Option<String>) -> Self {
        Self {
            cloud,
            default_region: default_region.filter(|r| !r.is_empty()),
        }
    }
}

#[async_trait]
impl Connector<AutoScalingGroup> for AutoScalingConnector {
    async fn connect(&self, group: &AutoScalingGroup) -> Result<Box<dyn ExternalClient>> {
        let region = group
            .spec
            .region
            .as_deref()
            .filter(|r| !r.is_empty())
            .or(self.default_region.as_deref())
            .ok_or_else(|| {
                Error::connect(format!(
                    "no region set on {} and no default region configured",
                    group.metadata.name
                ))
            })?;
        Ok(Box::new(AutoScalingExternal {
            api: self.cloud.api(region),
        }))
    }
}

struct AutoScalingExternal {
    api: AutoScalingApi,
}

impl AutoScalingExternal {
    async fn describe(&self, name: &str) -> Result<Option<AutoScalingGroupDescription>> {
        let input = DescribeAutoScalingGroupsInput {
            auto_scaling_group_names: vec![name.to_string()],
        };
        let output = self
            .api
            .describe_auto_scaling_groups(input)
            .await
            .map_err(into_error)?;
        Ok(output
            .auto_scaling_groups
            .into_iter()
            .find(|g| g.auto_scaling_group_name == name))
    }

    fn snapshot(&self, group: &AutoScalingGroupDescription) -> Result<Value> {
        let mut snapshot = serde_json::to_value(group)?;
        snapshot[DETAIL_REGION] = Value::String(self.api.region().to_string());
        Ok(snapshot)
    }

    fn details(&self, group: &AutoScalingGroupDescription) -> ConnectionDetails {
        let mut details = ConnectionDetails::new();
        details.insert(
            DETAIL_NAME.to_string(),
            group.auto_scaling_group_name.as_bytes().to_vec(),
        );
        details.insert(
            DETAIL_ARN.to_string(),
            group.auto_scaling_group_arn.as_bytes().to_vec(),
        );
        details.insert(
            DETAIL_REGION.to_string(),
            self.api.region().as_bytes().to_vec(),
        );
        details
    }
}

#[async_trait]
impl ExternalClient for AutoScalingExternal {
    async fn observe(&self, req: &ExternalRequest) -> Result<ExternalObservation> {
        let input: DescribeAutoScalingGroupsInput = input(req)?;
        let Some(name) = input.auto_scaling_group_names.first() else {
            return Err(Error::contract("describe request carries no group name"));
        };

        match self.describe(name).await? {
            Some(group) => Ok(ExternalObservation::exists(self.snapshot(&group)?)
                .with_external_name(group.auto_scaling_group_name.clone())
                .with_connection_details(self.details(&group))),
            None => Ok(ExternalObservation::missing()),
        }
    }

    async fn create(&self, req: &ExternalRequest) -> Result<ExternalCreation> {
        let input: CreateAutoScalingGroupInput = input(req)?;
        let name = input.auto_scaling_group_name.clone();
        self.api
            .create_auto_scaling_group(input)
            .await
            .map_err(into_error)?;

        // The create call returns nothing; look the group up for its ARN.
        let mut creation = ExternalCreation {
            external_name: name.clone(),
            ..Default::default()
        };
        if let Some(name) = name {
            if let Some(group) = self.describe(&name).await? {
                creation.connection_details = self.details(&group);
            }
        }
        Ok(creation)
    }

    async fn update(&self, req: &ExternalRequest, _snapshot: &Value) -> Result<ExternalUpdate> {
        let input: UpdateAutoScalingGroupInput = input(req)?;
        debug!(region = %self.api.region(), group = ?input.auto_scaling_group_name, "updating auto scaling group");
        self.api
            .update_auto_scaling_group(input)
            .await
            .map_err(into_error)?;
        Ok(ExternalUpdate::default())
    }

    async fn delete(&self, req: &ExternalRequest) -> Result<()> {
        let input: DeleteAutoScalingGroupInput = input(req)?;
        self.api
            .delete_auto_scaling_group(input)
            .await
            .map_err(into_error)
    }
}

fn input<T: DeserializeOwned>(req: &ExternalRequest) -> Result<T> {
    serde_json::from_value(req.to_value())
        .map_err(|e| Error::contract(format!("cannot map request onto autoscaling input: {}", e)))
}

fn into_error(err: CloudError) -> Error {
    match err {
        CloudError::NotFound(name) => Error::not_found(name),
        CloudError::Throttling => Error::throttled(err.to_string()),
        CloudError::AlreadyExists(_) | CloudError::Validation(_) => Error::provider(err.to_string()),
    }
}
