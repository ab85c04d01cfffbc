//! Forwards message lifecycle notifications to a messaging event sink.

use std::sync::Arc;

use campaign_core::event_bus::{make_event, EventSink};
use campaign_core::types::MessagingEventType;

use crate::action::ActionContext;
use crate::display::MessageDisplayListener;

pub struct EventSinkListener {
    sink: Arc<dyn EventSink>,
}

impl EventSinkListener {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    fn emit(&self, event_type: MessagingEventType, context: &ActionContext, executed: Option<&str>) {
        self.sink.emit(make_event(
            event_type,
            context.action_name(),
            Some(context.message_id().to_string()).filter(|id| !id.is_empty()),
            executed.map(str::to_string),
        ));
    }
}

impl MessageDisplayListener for EventSinkListener {
    fn on_message_displayed(&self, context: &ActionContext) -> anyhow::Result<()> {
        self.emit(MessagingEventType::MessageDisplayed, context, None);
        Ok(())
    }

    fn on_message_dismissed(&self, context: &ActionContext) -> anyhow::Result<()> {
        self.emit(MessagingEventType::MessageDismissed, context, None);
        Ok(())
    }

    /// `context` is the executed sub-action; the event is attributed to its parent
    /// message when there is one.
    fn on_action_executed(&self, name: &str, context: &ActionContext) -> anyhow::Result<()> {
        let message = context.parent().unwrap_or(context);
        self.emit(MessagingEventType::ActionExecuted, message, Some(name));
        Ok(())
    }
}
