//! Messaging event bus: trait for emitting in-app message lifecycle events.
//!
//! The action manager's listener adapter accepts an `Arc<dyn EventSink>` so hosts can
//! route displayed/dismissed/executed events into analytics or a vendor SDK.

use crate::types::{MessagingEvent, MessagingEventType};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Trait for emitting messaging events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MessagingEvent);
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<MessagingEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<MessagingEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: MessagingEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: MessagingEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating a `MessagingEvent` with minimal boilerplate.
pub fn make_event(
    event_type: MessagingEventType,
    action_name: impl Into<String>,
    message_id: Option<String>,
    executed_action: Option<String>,
) -> MessagingEvent {
    MessagingEvent {
        event_id: Uuid::new_v4(),
        event_type,
        action_name: action_name.into(),
        message_id,
        executed_action,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
