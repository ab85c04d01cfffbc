//! Collaborator contracts consulted by the action manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::{ActionContext, ActionsTrigger};
use crate::choice::MessageDisplayChoice;

/// Decides whether, and in which order, triggered messages are shown.
pub trait MessageDisplayController: Send + Sync {
    /// Called per message. `None` is treated as [`MessageDisplayChoice::Show`].
    fn should_display_message(&self, context: &ActionContext) -> Option<MessageDisplayChoice>;

    /// Called when several messages trigger at once; may reorder or drop any of them.
    /// The default keeps only the first one.
    fn prioritize_messages(
        &self,
        contexts: Vec<ActionContext>,
        _trigger: Option<&ActionsTrigger>,
    ) -> Vec<ActionContext> {
        contexts.into_iter().take(1).collect()
    }
}

/// Notification sink for message lifecycle. Errors are logged by the manager and
/// never change its state.
pub trait MessageDisplayListener: Send + Sync {
    fn on_message_displayed(&self, _context: &ActionContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_message_dismissed(&self, _context: &ActionContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_action_executed(&self, _name: &str, _context: &ActionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Frequency-capping hook for single messages.
pub trait SuppressionPolicy: Send + Sync {
    fn should_suppress(&self, context: &ActionContext) -> bool;
}

/// Records impressions once a message is on screen.
pub trait ImpressionRecorder: Send + Sync {
    fn record_message_impression(&self, message_id: &str) -> anyhow::Result<()>;

    /// Chained actions whose definition is action-only are counted apart from messages.
    fn record_chained_action_impression(&self, message_id: &str) -> anyhow::Result<()>;
}

/// Wake-up registered by the action manager with its readiness gate.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Polled before every queue pass. While closed, passes are deferred until the gate
/// fires a subscribed callback or `ActionManager::notify_ready` is called.
pub trait ReadinessGate: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Registers a callback to run each time the gate opens. Gates that never change
    /// state can ignore it.
    fn subscribe(&self, _on_ready: ReadyCallback) {}
}

pub struct AlwaysReady;

impl ReadinessGate for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Shared boolean gate, e.g. "remote variables received and no downloads pending".
/// Opening it wakes every subscribed manager.
#[derive(Clone, Default)]
pub struct ReadinessFlag {
    ready: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<ReadyCallback>>>,
}

impl ReadinessFlag {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(ready)),
            subscribers: Arc::default(),
        }
    }

    pub fn set(&self, ready: bool) {
        let was_ready = self.ready.swap(ready, Ordering::SeqCst);
        if ready && !was_ready {
            let subscribers = self.subscribers.lock().clone();
            for on_ready in subscribers {
                on_ready();
            }
        }
    }
}

impl ReadinessGate for ReadinessFlag {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn subscribe(&self, on_ready: ReadyCallback) {
        self.subscribers.lock().push(on_ready);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct ShowAll;

    impl MessageDisplayController for ShowAll {
        fn should_display_message(&self, _context: &ActionContext) -> Option<MessageDisplayChoice> {
            None
        }
    }

    #[test]
    fn test_default_prioritization_keeps_first() {
        let contexts = vec![ActionContext::new("A", "1"), ActionContext::new("B", "2")];
        let kept = ShowAll.prioritize_messages(contexts, None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].action_name(), "A");
        assert!(ShowAll.prioritize_messages(Vec::new(), None).is_empty());
    }

    #[test]
    fn test_readiness_flag_is_shared() {
        let flag = ReadinessFlag::new(false);
        let gate: Arc<dyn ReadinessGate> = Arc::new(flag.clone());
        assert!(!gate.is_ready());
        flag.set(true);
        assert!(gate.is_ready());
        assert!(AlwaysReady.is_ready());
    }

    #[test]
    fn test_readiness_flag_wakes_subscribers_on_open() {
        let flag = ReadinessFlag::new(false);
        let wakeups = Arc::new(AtomicUsize::new(0));
        let counter = wakeups.clone();
        flag.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        flag.set(false);
        assert_eq!(wakeups.load(Ordering::SeqCst), 0);
        flag.set(true);
        assert_eq!(wakeups.load(Ordering::SeqCst), 1);
        // Already open: no second wake-up.
        flag.set(true);
        assert_eq!(wakeups.load(Ordering::SeqCst), 1);
        flag.set(false);
        flag.set(true);
        assert_eq!(wakeups.load(Ordering::SeqCst), 2);
    }
}
