//! Manager configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opt-in engine features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    /// Publish connection details to an external secret store in addition to
    /// the local one.
    EnableAlphaExternalSecretStores,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::EnableAlphaExternalSecretStores => write!(f, "EnableAlphaExternalSecretStores"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeSet<Feature>);

impl Features {
    pub fn enable(&mut self, feature: Feature) {
        self.0.insert(feature);
    }

    pub fn enabled(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }
}

/// Options shared by every controller a manager runs.
///
/// Durations are written as seconds (fractions allowed) when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerOptions {
    /// Concurrent reconciles across all kinds.
    pub workers: usize,
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// Deadline for a single reconcile run.
    #[serde(with = "seconds")]
    pub reconcile_timeout: Duration,
    #[serde(with = "seconds")]
    pub backoff_base: Duration,
    #[serde(with = "seconds")]
    pub backoff_ceiling: Duration,
    #[serde(with = "seconds")]
    pub post_mutation_wait: Duration,
    #[serde(with = "seconds")]
    pub veto_wait: Duration,
    /// Re-read and reapply attempts on a status write conflict.
    pub status_update_retries: u32,
    /// Consecutive deletion vetoes before the object reports DeletionBlocked.
    pub veto_threshold: u32,
    pub features: Features,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(60),
            reconcile_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
            post_mutation_wait: Duration::from_secs(1),
            veto_wait: Duration::from_secs(5),
            status_update_retries: 5,
            veto_threshold: 10,
            features: Features::default(),
        }
    }
}

impl ManagerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be positive"));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::config("reconcile timeout must be positive"));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::config("backoff base must be positive"));
        }
        if self.backoff_ceiling < self.backoff_base {
            return Err(Error::config(format!(
                "backoff ceiling {:?} is below the base {:?}",
                self.backoff_ceiling, self.backoff_base
            )));
        }
        Ok(())
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
