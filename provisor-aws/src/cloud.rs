//! Simulated autoscaling API.
//!
//! Stands in for the cloud SDK: region-scoped groups held in memory, with the
//! same request/response shapes and error codes the real service uses. Tests
//! inject throttling through [`AutoScalingCloud::throttle_next`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Account every simulated ARN belongs to.
pub const ACCOUNT_ID: &str = "123456789012";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("ValidationError: AutoScalingGroup name not found - {0}")]
    NotFound(String),

    #[error("AlreadyExists: AutoScalingGroup by this name already exists - {0}")]
    AlreadyExists(String),

    #[error("Throttling: Rate exceeded")]
    Throttling,

    #[error("ValidationError: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// A group as the service describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroupDescription {
    pub auto_scaling_group_name: String,
    #[serde(rename = "autoScalingGroupARN")]
    pub auto_scaling_group_arn: String,
    pub min_size: i64,
    pub max_size: i64,
    pub desired_capacity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_template_name: Option<String>,
    pub availability_zones: Vec<String>,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeAutoScalingGroupsInput {
    #[serde(default)]
    pub auto_scaling_group_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescribeAutoScalingGroupsOutput {
    pub auto_scaling_groups: Vec<AutoScalingGroupDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAutoScalingGroupInput {
    pub auto_scaling_group_name: Option<String>,
    pub min_size: i64,
    pub max_size: i64,
    pub desired_capacity: Option<i64>,
    pub launch_template_name: Option<String>,
    #[serde(default)]
    pub availability_zones: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAutoScalingGroupInput {
    pub auto_scaling_group_name: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub desired_capacity: Option<i64>,
    pub launch_template_name: Option<String>,
    pub availability_zones: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAutoScalingGroupInput {
    pub auto_scaling_group_name: Option<String>,
    #[serde(default)]
    pub force_delete: bool,
}

type Groups = BTreeMap<String, AutoScalingGroupDescription>;

#[derive(Default)]
struct Shared {
    regions: RwLock<HashMap<String, Groups>>,
    throttle: AtomicU32,
}

/// The whole simulated cloud. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct AutoScalingCloud {
    shared: Arc<Shared>,
}

impl AutoScalingCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// API client bound to one region.
    pub fn api(&self, region: impl Into<String>) -> AutoScalingApi {
        AutoScalingApi {
            region: region.into(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Fail the next `n` calls in any region with [`CloudError::Throttling`].
    pub fn throttle_next(&self, n: u32) {
        self.shared.throttle.store(n, Ordering::SeqCst);
    }

    /// Number of groups in `region`.
    pub async fn group_count(&self, region: &str) -> usize {
        self.shared
            .regions
            .read()
            .await
            .get(region)
            .map_or(0, BTreeMap::len)
    }
}

/// Region-bound client, shaped like the SDK's.
#[derive(Clone)]
pub struct AutoScalingApi {
    region: String,
    shared: Arc<Shared>,
}

impl AutoScalingApi {
    pub fn region(&self) -> &str {
        &self.region
    }

    fn check_throttle(&self) -> Result<()> {
        let throttled = self
            .shared
            .throttle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            debug!(region = %self.region, "simulated throttling");
            return Err(CloudError::Throttling);
        }
        Ok(())
    }

    fn arn(&self, name: &str) -> String {
        format!(
            "arn:aws:autoscaling:{}:{}:autoScalingGroup:{}:autoScalingGroupName/{}",
            self.region,
            ACCOUNT_ID,
            uuid::Uuid::new_v4(),
            name
        )
    }

    pub async fn describe_auto_scaling_groups(
        &self,
        input: DescribeAutoScalingGroupsInput,
    ) -> Result<DescribeAutoScalingGroupsOutput> {
        self.check_throttle()?;
        let regions = self.shared.regions.read().await;
        let Some(groups) = regions.get(&self.region) else {
            return Ok(DescribeAutoScalingGroupsOutput::default());
        };

        let auto_scaling_groups = if input.auto_scaling_group_names.is_empty() {
            groups.values().cloned().collect()
        } else {
            input
                .auto_scaling_group_names
                .iter()
                .filter_map(|name| groups.get(name).cloned())
                .collect()
        };
        Ok(DescribeAutoScalingGroupsOutput {
            auto_scaling_groups,
        })
    }

    pub async fn create_auto_scaling_group(&self, input: CreateAutoScalingGroupInput) -> Result<()> {
        self.check_throttle()?;
        let name = required_name(input.auto_scaling_group_name)?;
        let desired = input.desired_capacity.unwrap_or(input.min_size);
        validate_sizes(input.min_size, input.max_size, desired)?;

        let mut regions = self.shared.regions.write().await;
        let groups = regions.entry(self.region.clone()).or_default();
        if groups.contains_key(&name) {
            return Err(CloudError::AlreadyExists(name));
        }

        let group = AutoScalingGroupDescription {
            auto_scaling_group_arn: self.arn(&name),
            auto_scaling_group_name: name.clone(),
            min_size: input.min_size,
            max_size: input.max_size,
            desired_capacity: desired,
            launch_template_name: input.launch_template_name,
            availability_zones: input.availability_zones,
            created_time: Utc::now(),
        };
        debug!(region = %self.region, group = %name, "created auto scaling group");
        groups.insert(name, group);
        Ok(())
    }

    pub async fn update_auto_scaling_group(&self, input: UpdateAutoScalingGroupInput) -> Result<()> {
        self.check_throttle()?;
        let name = required_name(input.auto_scaling_group_name)?;

        let mut regions = self.shared.regions.write().await;
        let group = regions
            .get_mut(&self.region)
            .and_then(|groups| groups.get_mut(&name))
            .ok_or_else(|| CloudError::NotFound(name.clone()))?;

        let min_size = input.min_size.unwrap_or(group.min_size);
        let max_size = input.max_size.unwrap_or(group.max_size);
        // The service clamps the current capacity into a narrowed range.
        let desired = input
            .desired_capacity
            .unwrap_or_else(|| group.desired_capacity.clamp(min_size, max_size.max(min_size)));
        validate_sizes(min_size, max_size, desired)?;

        group.min_size = min_size;
        group.max_size = max_size;
        group.desired_capacity = desired;
        if let Some(template) = input.launch_template_name {
            group.launch_template_name = Some(template);
        }
        if let Some(zones) = input.availability_zones {
            group.availability_zones = zones;
        }
        debug!(region = %self.region, group = %name, "updated auto scaling group");
        Ok(())
    }

    pub async fn delete_auto_scaling_group(&self, input: DeleteAutoScalingGroupInput) -> Result<()> {
        self.check_throttle()?;
        let name = required_name(input.auto_scaling_group_name)?;

        let mut regions = self.shared.regions.write().await;
        let removed = regions
            .get_mut(&self.region)
            .and_then(|groups| groups.remove(&name));
        match removed {
            Some(_) => {
                debug!(region = %self.region, group = %name, force = input.force_delete, "deleted auto scaling group");
                Ok(())
            }
            None => Err(CloudError::NotFound(name)),
        }
    }
}

fn required_name(name: Option<String>) -> Result<String> {
    match name {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(CloudError::Validation(
            "AutoScalingGroupName is required".to_string(),
        )),
    }
}

fn validate_sizes(min: i64, max: i64, desired: i64) -> Result<()> {
    if min < 0 || max < 0 {
        return Err(CloudError::Validation(
            "MinSize and MaxSize must not be negative".to_string(),
        ));
    }
    if min > max {
        return Err(CloudError::Validation(format!(
            "MinSize {} must be less than or equal to MaxSize {}",
            min, max
        )));
    }
    if desired < min || desired > max {
        return Err(CloudError::Validation(format!(
            "DesiredCapacity {} must be between MinSize {} and MaxSize {}",
            desired, min, max
        )));
    }
    Ok(())
}
