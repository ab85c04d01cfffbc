//! Action queue: a double-ended list of pending actions behind a single lock.
//!
//! Every operation takes the lock once, so batch pushes and drains are atomic with
//! respect to concurrent producers and the manager's consumer loop.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::action::Action;

#[derive(Default)]
pub struct ActionQueue {
    queue: Mutex<VecDeque<Action>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_back(&self, action: Action) {
        self.queue.lock().push_back(action);
    }

    /// Appends a batch, preserving its relative order.
    pub fn push_back_all(&self, actions: impl IntoIterator<Item = Action>) {
        self.queue.lock().extend(actions);
    }

    pub fn push_front(&self, action: Action) {
        self.queue.lock().push_front(action);
    }

    /// Prepends a batch so it ends up at the front in its original relative order.
    pub fn push_front_all(&self, actions: Vec<Action>) {
        let mut queue = self.queue.lock();
        for action in actions.into_iter().rev() {
            queue.push_front(action);
        }
    }

    pub fn pop(&self) -> Option<Action> {
        self.queue.lock().pop_front()
    }

    /// Drains the queue in order; the queue is empty afterwards.
    pub fn pop_all(&self) -> Vec<Action> {
        self.queue.lock().drain(..).collect()
    }

    pub fn first(&self) -> Option<Action> {
        self.queue.lock().front().cloned()
    }

    pub fn last(&self) -> Option<Action> {
        self.queue.lock().back().cloned()
    }

    /// Removes the given action (by identity) if it is queued.
    pub fn remove(&self, action: &Action) -> bool {
        let mut queue = self.queue.lock();
        match queue.iter().position(|queued| queued == action) {
            Some(index) => queue.remove(index).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock();
        f.debug_list()
            .entries(queue.iter().map(|action| action.to_string()))
            .finish()
    }
}
