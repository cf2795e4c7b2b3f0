//! Change events and the sinks that record them.
//!
//! An operand returns a [`ChangeEvent`] when a call actually mutated
//! something. The executor hands every collected event to the configured
//! [`EventRecorder`] once the step that produced it has finished.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::object::ObjectReference;

/// Default buffer size for the broadcast channel.
/// Slow receivers lose the oldest events beyond this limit.
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Severity of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Normal => "Normal",
            EventKind::Warning => "Warning",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation applied by an operand during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    /// Short machine-readable cause, e.g. `DeploymentCreated`.
    pub reason: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Create a "Normal" event.
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::Normal, reason, message)
    }

    /// Create a "Warning" event.
    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::Warning, reason, message)
    }
}

/// Sink for change events, recorded against the parent object.
///
/// Recording is fire-and-forget: implementations must not block and have no
/// way to fail the pass.
pub trait EventRecorder: Send + Sync {
    fn record(&self, target: &ObjectReference, event: &ChangeEvent);
}

impl<R: EventRecorder + ?Sized> EventRecorder for Arc<R> {
    fn record(&self, target: &ObjectReference, event: &ChangeEvent) {
        (**self).record(target, event)
    }
}

/// Recorder that writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, target: &ObjectReference, event: &ChangeEvent) {
        match event.kind {
            EventKind::Normal => tracing::info!(
                target_object = %target,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventKind::Warning => tracing::warn!(
                target_object = %target,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// An event together with the object it was recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub target: ObjectReference,
    pub event: ChangeEvent,
}

/// Recorder that fans events out over a tokio broadcast channel.
///
/// Cloning shares the channel. Events recorded while nobody is subscribed
/// are dropped.
#[derive(Clone)]
pub struct BroadcastEventRecorder {
    sender: broadcast::Sender<RecordedEvent>,
}

impl BroadcastEventRecorder {
    /// Create a new recorder with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new recorder with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder for BroadcastEventRecorder {
    fn record(&self, target: &ObjectReference, event: &ChangeEvent) {
        let delivered = self
            .sender
            .send(RecordedEvent {
                target: target.clone(),
                event: event.clone(),
            })
            .unwrap_or_default();
        tracing::trace!(target_object = %target, reason = %event.reason, delivered, "Recorded change event");
    }
}

impl fmt::Debug for BroadcastEventRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastEventRecorder")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
