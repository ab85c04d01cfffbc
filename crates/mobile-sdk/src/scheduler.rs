//! Delayed re-delivery of actions the display controller postponed.
//!
//! A scheduler fires once per scheduled action, no earlier than the requested delay, and
//! hands the action back through its [`ScheduleTarget`], which appends it to the queue.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use campaign_core::error::{MessagingError, MessagingResult};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::action::Action;
use crate::manager::Shared;

pub trait ActionScheduler: Send + Sync {
    fn schedule(&self, action: Action, delay_seconds: u32, target: ScheduleTarget);
}

/// Where a fired action is re-submitted. Holds the manager weakly so pending timers never
/// keep it alive.
#[derive(Clone)]
pub struct ScheduleTarget {
    manager: Weak<Shared>,
}

impl ScheduleTarget {
    pub(crate) fn new(manager: Weak<Shared>) -> Self {
        Self { manager }
    }

    /// Appends the action to the manager's queue with default priority. Returns `false`
    /// when the manager is gone.
    pub fn deliver(&self, action: Action) -> bool {
        match self.manager.upgrade() {
            Some(manager) => {
                debug!(action = %action, "Delivering delayed action");
                manager.append_action(action);
                true
            }
            None => {
                warn!(action = %action, "Dropping delayed action, manager no longer exists");
                false
            }
        }
    }
}

impl fmt::Debug for ScheduleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleTarget")
            .field("alive", &(self.manager.strong_count() > 0))
            .finish()
    }
}

/// Fires delayed actions from a tokio timer task.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> MessagingResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| MessagingError::Scheduler(e.to_string()))?;
        Ok(Self::new(handle))
    }
}

impl ActionScheduler for TokioScheduler {
    fn schedule(&self, action: Action, delay_seconds: u32, target: ScheduleTarget) {
        debug!(action = %action, delay_seconds, "Scheduling delayed action");
        self.handle.spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(delay_seconds))).await;
            target.deliver(action);
        });
    }
}

struct PendingAction {
    action: Action,
    due_at: u64,
    target: ScheduleTarget,
}

/// Scheduler driven by an explicit virtual clock. Nothing fires until [`advance`] is
/// called, which makes delays deterministic for tests and simulations.
///
/// [`advance`]: ManualScheduler::advance
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: u64,
    pending: Vec<PendingAction>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Seconds elapsed on the virtual clock.
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Moves the clock forward and delivers every action that became due, earliest first.
    /// Returns how many actions fired.
    pub fn advance(&self, seconds: u64) -> usize {
        let due = {
            let mut state = self.state.lock();
            state.now = state.now.saturating_add(seconds);
            let now = state.now;
            let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|p| p.due_at <= now);
            state.pending = pending;
            due.sort_by_key(|p| p.due_at);
            due
        };

        let fired = due.len();
        for pending in due {
            pending.target.deliver(pending.action);
        }
        fired
    }
}

impl ActionScheduler for ManualScheduler {
    fn schedule(&self, action: Action, delay_seconds: u32, target: ScheduleTarget) {
        let mut state = self.state.lock();
        let due_at = state.now.saturating_add(u64::from(delay_seconds));
        debug!(action = %action, delay_seconds, due_at, "Scheduling delayed action");
        state.pending.push(PendingAction {
            action,
            due_at,
            target,
        });
    }
}
