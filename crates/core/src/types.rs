use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle event emitted while an in-app message moves through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingEvent {
    pub event_id: Uuid,
    pub event_type: MessagingEventType,
    pub action_name: String,
    pub message_id: Option<String>,
    /// Name of the sub-action for `ActionExecuted` events.
    pub executed_action: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessagingEventType {
    MessageDisplayed,
    MessageDismissed,
    ActionExecuted,
}

impl MessagingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingEventType::MessageDisplayed => "message_displayed",
            MessagingEventType::MessageDismissed => "message_dismissed",
            MessagingEventType::ActionExecuted => "action_executed",
        }
    }
}

impl std::fmt::Display for MessagingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
