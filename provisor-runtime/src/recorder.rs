//! Events about managed objects.
//!
//! Events are fire-and-forget. The default recorder writes them through
//! tracing under the `event` target so they can be filtered separately.

use std::fmt;
use std::sync::Mutex;

use crate::resource::ObjectKey;

pub const REASON_CANNOT_CONNECT: &str = "CannotConnectToProvider";
pub const REASON_CANNOT_OBSERVE: &str = "CannotObserveExternalResource";
pub const REASON_CANNOT_CREATE: &str = "CannotCreateExternalResource";
pub const REASON_CANNOT_UPDATE: &str = "CannotUpdateExternalResource";
pub const REASON_CANNOT_DELETE: &str = "CannotDeleteExternalResource";
pub const REASON_CANNOT_PUBLISH: &str = "CannotPublishConnectionDetails";
pub const REASON_CREATED: &str = "CreatedExternalResource";
pub const REASON_UPDATED: &str = "UpdatedExternalResource";
pub const REASON_DELETED: &str = "DeletedExternalResource";
pub const REASON_VETOED: &str = "ActionVetoedByAdapter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub kind: &'static str,
    pub object: ObjectKey,
}

impl Event {
    pub fn normal(
        kind: &'static str,
        object: ObjectKey,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
            kind,
            object,
        }
    }

    pub fn warning(
        kind: &'static str,
        object: ObjectKey,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
            kind,
            object,
        }
    }
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Writes events as tracing records.
pub struct TracingRecorder {
    controller: String,
}

impl TracingRecorder {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }
}

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => tracing::info!(
                target: "event",
                controller = %self.controller,
                kind = event.kind,
                object = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                target: "event",
                controller = %self.controller,
                kind = event.kind,
                object = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps events in memory (for testing).
#[derive(Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reasons of all recorded events, oldest first.
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
