//! Status conditions.
//!
//! Conditions are advisory: they tell operators what the last reconcile
//! concluded. The engine writes them but never reads them back to decide
//! what to do next.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::Managed;

/// Condition type reporting whether the external resource is usable.
pub const TYPE_READY: &str = "Ready";
/// Condition type reporting the outcome of the last reconcile.
pub const TYPE_SYNCED: &str = "Synced";

pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_UNAVAILABLE: &str = "Unavailable";
pub const REASON_CREATING: &str = "Creating";
pub const REASON_DELETING: &str = "Deleting";
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";
pub const REASON_CREATE_FAILED: &str = "CreateFailed";
pub const REASON_UPDATE_FAILED: &str = "UpdateFailed";
pub const REASON_DELETE_FAILED: &str = "DeleteFailed";
pub const REASON_CONTRACT_VIOLATION: &str = "ContractViolation";
pub const REASON_DELETION_BLOCKED: &str = "DeletionBlocked";
pub const REASON_CREATE_BLOCKED: &str = "CreateBlocked";
pub const REASON_UPDATE_BLOCKED: &str = "UpdateBlocked";
pub const REASON_RECONCILE_BLOCKED: &str = "ReconcileBlocked";

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A typed status flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message,
            last_transition_time: Utc::now(),
        }
    }

    /// The condition reported for a type that was never set.
    pub fn unknown(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::Unknown, "", None)
    }

    /// The external resource exists and is ready for use.
    pub fn available() -> Self {
        Self::new(TYPE_READY, ConditionStatus::True, REASON_AVAILABLE, None)
    }

    /// The external resource exists but is not ready for use.
    pub fn unavailable() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, REASON_UNAVAILABLE, None)
    }

    /// The external resource is being created.
    pub fn creating() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, REASON_CREATING, None)
    }

    /// The external resource is being deleted.
    pub fn deleting() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, REASON_DELETING, None)
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            TYPE_SYNCED,
            ConditionStatus::True,
            REASON_RECONCILE_SUCCESS,
            None,
        )
    }

    /// Synced=False with the given reason and the error text as message.
    pub fn reconcile_error(reason: &str, err: &impl fmt::Display) -> Self {
        Self::new(
            TYPE_SYNCED,
            ConditionStatus::False,
            reason,
            Some(err.to_string()),
        )
    }

    /// Same type, status, reason and message. Transition time is ignored.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upsert `condition` into a condition list.
///
/// Returns whether the list changed. The transition time only moves when the
/// status changes. Lists read back from a store may come in any order, so the
/// lookup is by type and new entries go before the first greater type.
pub fn upsert(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.equivalent(&condition) {
            return false;
        }
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
        return true;
    }
    let idx = conditions
        .iter()
        .position(|c| c.type_ > condition.type_)
        .unwrap_or(conditions.len());
    conditions.insert(idx, condition);
    true
}

/// Set one condition on a managed resource.
pub fn set_condition<R: Managed>(
    obj: &mut R,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: Option<String>,
) -> bool {
    upsert(
        &mut obj.status_mut().conditions,
        Condition::new(type_, status, reason, message),
    )
}

/// Read one condition. Absent types read as Unknown.
pub fn get_condition<R: Managed>(obj: &R, type_: &str) -> Condition {
    obj.status()
        .conditions
        .iter()
        .find(|c| c.type_ == type_)
        .cloned()
        .unwrap_or_else(|| Condition::unknown(type_))
}
