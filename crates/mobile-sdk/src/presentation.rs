//! Handle given to present/dismiss handlers for the action currently on screen.
//!
//! `dismiss` completes the presentation exactly once; `execute` reports sub-actions
//! (button taps, chained opens) and is ignored after dismissal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::action::{Action, ActionContext};
use crate::manager::Shared;

#[derive(Clone)]
pub struct Presentation {
    inner: Arc<PresentationInner>,
}

struct PresentationInner {
    action: Action,
    finished: AtomicBool,
    manager: Weak<Shared>,
}

impl Presentation {
    pub(crate) fn new(action: Action, manager: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(PresentationInner {
                action,
                finished: AtomicBool::new(false),
                manager,
            }),
        }
    }

    /// A presentation not attached to any manager; `dismiss` and `execute` only flip state.
    pub fn detached(action: Action) -> Self {
        Self::new(action, Weak::new())
    }

    pub fn action(&self) -> &Action {
        &self.inner.action
    }

    pub fn context(&self) -> &ActionContext {
        self.inner.action.context()
    }

    pub fn is_dismissed(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Signals that the message left the screen. Returns `false` if the presentation
    /// was already finished.
    pub fn dismiss(&self) -> bool {
        if !self.finish() {
            debug!(action = %self.context(), "Ignoring repeated dismiss");
            return false;
        }
        if let Some(manager) = self.inner.manager.upgrade() {
            manager.action_did_dismiss(self);
        }
        true
    }

    /// Signals that a sub-action ran while the message stays visible. Returns `false`
    /// once the presentation is finished.
    pub fn execute(&self, executed: &ActionContext) -> bool {
        if self.is_dismissed() {
            debug!(action = %self.context(), executed = %executed, "Ignoring execute after dismiss");
            return false;
        }
        if let Some(manager) = self.inner.manager.upgrade() {
            manager.action_did_execute(executed);
        }
        true
    }

    /// Marks the presentation finished without notifying anyone. Returns whether this
    /// call did the transition.
    pub(crate) fn finish(&self) -> bool {
        !self.inner.finished.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_same(&self, other: &Presentation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Presentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Presentation")
            .field("action", &self.inner.action.to_string())
            .field("dismissed", &self.is_dismissed())
            .finish()
    }
}
