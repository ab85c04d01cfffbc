//! Actions: queued units of work, each wrapping the context of one message occurrence.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parent action name used for actions opened from a push notification.
pub const PUSH_NOTIFICATION_ACTION_NAME: &str = "__Push Notification";
/// Action name used for control-group (held back) messages.
pub const HELD_BACK_ACTION_NAME: &str = "__held_back";

/// Identifies one occurrence of a message or action: the definition name to run,
/// the message it belongs to, its arguments, and the context that spawned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    name: String,
    message_id: String,
    parent: Option<Arc<ActionContext>>,
    chained_message: bool,
    args: serde_json::Value,
}

impl ActionContext {
    pub fn new(name: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_id: message_id.into(),
            parent: None,
            chained_message: false,
            args: serde_json::Value::Null,
        }
    }

    pub fn with_parent(mut self, parent: ActionContext) -> Self {
        self.parent = Some(Arc::new(parent));
        self
    }

    /// Marks this context as the next message of a chained-message sequence.
    pub fn chained(mut self) -> Self {
        self.chained_message = true;
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn action_name(&self) -> &str {
        &self.name
    }

    /// Control-group occurrence: counted as an impression, never shown.
    pub fn is_held_back(&self) -> bool {
        self.name == HELD_BACK_ACTION_NAME
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn parent(&self) -> Option<&ActionContext> {
        self.parent.as_deref()
    }

    pub fn is_chained_message(&self) -> bool {
        self.chained_message
    }

    pub fn args(&self) -> &serde_json::Value {
        &self.args
    }

    /// Looks up an argument by dotted name, e.g. `"Accept button.Text"`.
    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        name.split('.')
            .try_fold(&self.args, |value, component| value.get(component))
    }
}

impl fmt::Display for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.message_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Default action.
    Single,
    /// Chained to an existing action.
    Chained,
    /// Embedded inside an existing action.
    Embedded,
}

/// A queued action. Identity is the generated `id`, so two actions built from
/// equal contexts are still distinct queue entries.
#[derive(Debug, Clone)]
pub struct Action {
    id: Uuid,
    action_type: ActionType,
    context: ActionContext,
}

impl Action {
    /// Classifies the context: embedded when it has a parent and is not part of a
    /// chained sequence, chained when it is, single otherwise.
    pub fn create(context: ActionContext) -> Self {
        let action_type = if context.is_chained_message() {
            ActionType::Chained
        } else if context.parent().is_some() {
            ActionType::Embedded
        } else {
            ActionType::Single
        };
        Self {
            id: Uuid::new_v4(),
            action_type,
            context,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn context(&self) -> &ActionContext {
        &self.context
    }

    pub fn is_notification(&self) -> bool {
        self.context
            .parent()
            .is_some_and(|parent| parent.action_name() == PUSH_NOTIFICATION_ACTION_NAME)
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Action {}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.action_type, self.context)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Default,
}

/// What caused a batch of messages to trigger; handed to the prioritization hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionsTrigger {
    pub event_name: Option<String>,
    pub condition: Vec<String>,
    pub contextual_values: Option<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification() {
        let single = Action::create(ActionContext::new("Alert", "1"));
        assert_eq!(single.action_type(), ActionType::Single);

        let embedded =
            Action::create(ActionContext::new("Open URL", "1").with_parent(ActionContext::new("Alert", "1")));
        assert_eq!(embedded.action_type(), ActionType::Embedded);

        let chained = Action::create(
            ActionContext::new("Center Popup", "2")
                .with_parent(ActionContext::new("Alert", "1"))
                .chained(),
        );
        assert_eq!(chained.action_type(), ActionType::Chained);

        // Chained without a parent still counts as chained.
        let orphan = Action::create(ActionContext::new("Center Popup", "3").chained());
        assert_eq!(orphan.action_type(), ActionType::Chained);
    }

    #[test]
    fn test_is_notification() {
        let push = Action::create(
            ActionContext::new("Alert", "9")
                .with_parent(ActionContext::new(PUSH_NOTIFICATION_ACTION_NAME, "9")),
        );
        assert!(push.is_notification());

        let plain = Action::create(ActionContext::new("Alert", "9"));
        assert!(!plain.is_notification());

        let nested = Action::create(
            ActionContext::new("Alert", "9").with_parent(ActionContext::new("Interstitial", "9")),
        );
        assert!(!nested.is_notification());
    }

    #[test]
    fn test_identity_is_per_instance() {
        let ctx = ActionContext::new("Alert", "1");
        let a = Action::create(ctx.clone());
        let b = Action::create(ctx);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_dotted_arg_lookup() {
        let ctx = ActionContext::new("Confirm", "5").with_args(json!({
            "Message": "Hello",
            "Accept button": { "Text": "OK" }
        }));
        assert_eq!(ctx.arg("Message"), Some(&json!("Hello")));
        assert_eq!(ctx.arg("Accept button.Text"), Some(&json!("OK")));
        assert!(ctx.arg("Accept button.Color").is_none());
        assert_eq!(ctx.to_string(), "Confirm:5");
    }

    #[test]
    fn test_priority_default() {
        assert_eq!(Priority::default(), Priority::Default);
    }
}
