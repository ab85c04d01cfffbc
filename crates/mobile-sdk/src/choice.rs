use serde::{Deserialize, Serialize};

/// Decision returned by a display controller for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageDisplayChoice {
    #[default]
    Show,
    Discard,
    /// Re-deliver after `seconds`; `0` holds the message until
    /// `ActionManager::trigger_delayed_messages` is called.
    Delay { seconds: u32 },
}

impl MessageDisplayChoice {
    pub fn show() -> Self {
        MessageDisplayChoice::Show
    }

    pub fn discard() -> Self {
        MessageDisplayChoice::Discard
    }

    pub fn delay(seconds: u32) -> Self {
        MessageDisplayChoice::Delay { seconds }
    }

    pub fn delay_indefinitely() -> Self {
        MessageDisplayChoice::Delay { seconds: 0 }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(MessageDisplayChoice::default(), MessageDisplayChoice::Show);
        assert_eq!(
            MessageDisplayChoice::delay_indefinitely(),
            MessageDisplayChoice::Delay { seconds: 0 }
        );
        assert_eq!(
            MessageDisplayChoice::delay(30),
            MessageDisplayChoice::Delay { seconds: 30 }
        );
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(MessageDisplayChoice::delay(5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "delay", "seconds": 5}));
        let discard: MessageDisplayChoice =
            serde_json::from_str(r#"{"type":"discard"}"#).unwrap();
        assert_eq!(discard, MessageDisplayChoice::Discard);
    }
}
