//! Change notifications emitted by the store.

use crate::resource::{Managed, ObjectKey};

/// Events emitted when stored objects change.
///
/// Status-only writes are reported separately so that the engine's own
/// status updates do not retrigger it.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    /// A new object was created.
    Created(R),
    /// The user changed the spec (generation bumped).
    SpecChanged(R),
    /// Only status, annotations or finalizers changed.
    StatusChanged(R),
    /// The deletion marker was set; the object waits on finalizers.
    DeletionRequested(R),
    /// The object left the store.
    Deleted(ObjectKey),
}

impl<R: Managed> WatchEvent<R> {
    pub fn key(&self) -> ObjectKey {
        match self {
            WatchEvent::Created(obj)
            | WatchEvent::SpecChanged(obj)
            | WatchEvent::StatusChanged(obj)
            | WatchEvent::DeletionRequested(obj) => obj.key(),
            WatchEvent::Deleted(key) => key.clone(),
        }
    }

    /// Whether this change should preempt the reconcile schedule.
    pub fn triggers_reconcile(&self) -> bool {
        matches!(
            self,
            WatchEvent::Created(_) | WatchEvent::SpecChanged(_) | WatchEvent::DeletionRequested(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            WatchEvent::Created(_) => "created",
            WatchEvent::SpecChanged(_) => "spec_changed",
            WatchEvent::StatusChanged(_) => "status_changed",
            WatchEvent::DeletionRequested(_) => "deletion_requested",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}
