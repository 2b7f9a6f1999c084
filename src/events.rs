//! Events attached to source routes.
//!
//! Every create, update and delete of a derived target, and every skipped
//! host, is reported against the source route so an operator reading that
//! object's event stream sees what the controller did and why.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{ObjectKey, SourceRoute};

/// Event reason codes.
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const DELETED: &str = "Deleted";
    pub const EMPTY_HOST: &str = "EmptyHost";
    pub const NO_RULES: &str = "NoRules";
    pub const INVALID_HOST: &str = "InvalidHost";
    pub const TUNNEL_NOT_FOUND: &str = "TunnelNotFound";
    pub const TUNNEL_RESOLUTION_FAILED: &str = "TunnelResolutionFailed";
    pub const TUNNEL_AMBIGUOUS: &str = "TunnelAmbiguous";
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Normal,
    Warning,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Source route the event is about.
    pub regarding: ObjectKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Sink for events about source routes.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(
        &self,
        source: &SourceRoute,
        event_type: EventType,
        reason: &str,
        message: String,
    );
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventRecorder;

#[async_trait]
impl EventRecorder for LogEventRecorder {
    async fn publish(
        &self,
        source: &SourceRoute,
        event_type: EventType,
        reason: &str,
        message: String,
    ) {
        let regarding = source.key();
        match event_type {
            EventType::Normal => {
                tracing::info!(source = %regarding, reason, "{message}");
            }
            EventType::Warning => {
                tracing::warn!(source = %regarding, reason, "{message}");
            }
        }
    }
}

/// Keeps events in memory, in publish order.
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Returns events with the given reason.
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    /// Counts events with the given reason.
    pub fn count(&self, reason: &str) -> usize {
        self.lock().iter().filter(|e| e.reason == reason).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        // A poisoned lock only means a test panicked mid-push; the data is still usable.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn publish(
        &self,
        source: &SourceRoute,
        event_type: EventType,
        reason: &str,
        message: String,
    ) {
        self.lock().push(Event {
            regarding: source.key(),
            event_type,
            reason: reason.to_string(),
            message,
        });
    }
}
