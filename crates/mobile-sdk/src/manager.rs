//! Action manager: the single-slot state machine that pops queued actions, asks the
//! display controller what to do with each one, presents it, and moves on once it is
//! dismissed.
//!
//! Queue passes never overlap. Whoever finds the pass loop idle runs it (inline, or on a
//! runtime worker when configured); enqueues, dismissals and readiness changes that land
//! while it runs only request another iteration. The queues themselves are locked, so
//! producers on any thread can trigger concurrently with the running loop.
//!
//! Host callbacks that panic are reported as handler errors. Anything else unwinding out
//! of a pass still releases the slot and the pass loop.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use campaign_core::config::QueueConfig;
use campaign_core::error::{MessagingError, MessagingResult};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionContext, ActionType, ActionsTrigger, Priority};
use crate::choice::MessageDisplayChoice;
use crate::definitions::{ActionDefinition, ActionKind, Definitions};
use crate::display::{
    AlwaysReady, ImpressionRecorder, MessageDisplayController, MessageDisplayListener,
    ReadinessGate, SuppressionPolicy,
};
use crate::presentation::Presentation;
use crate::queue::ActionQueue;
use crate::scheduler::{ActionScheduler, ScheduleTarget};

/// Where queue passes run.
#[derive(Clone)]
pub enum DispatchPolicy {
    /// On the thread that triggered the pass.
    Inline,
    /// On a blocking worker of the given runtime. Presentation state is still only
    /// mutated by the one running pass loop.
    Worker(tokio::runtime::Handle),
}

impl fmt::Debug for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPolicy::Inline => f.write_str("Inline"),
            DispatchPolicy::Worker(_) => f.write_str("Worker"),
        }
    }
}

pub struct ActionManagerBuilder {
    config: QueueConfig,
    scheduler: Arc<dyn ActionScheduler>,
    definitions: Arc<Definitions>,
    controller: Option<Arc<dyn MessageDisplayController>>,
    listener: Option<Arc<dyn MessageDisplayListener>>,
    suppression: Option<Arc<dyn SuppressionPolicy>>,
    impressions: Option<Arc<dyn ImpressionRecorder>>,
    readiness: Arc<dyn ReadinessGate>,
    runtime: Option<tokio::runtime::Handle>,
}

impl ActionManagerBuilder {
    pub fn new(scheduler: Arc<dyn ActionScheduler>) -> Self {
        Self {
            config: QueueConfig::default(),
            scheduler,
            definitions: Arc::new(Definitions::new()),
            controller: None,
            listener: None,
            suppression: None,
            impressions: None,
            readiness: Arc::new(AlwaysReady),
            runtime: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn definitions(mut self, definitions: Arc<Definitions>) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn display_controller(mut self, controller: Arc<dyn MessageDisplayController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn display_listener(mut self, listener: Arc<dyn MessageDisplayListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn suppression_policy(mut self, policy: Arc<dyn SuppressionPolicy>) -> Self {
        self.suppression = Some(policy);
        self
    }

    pub fn impression_recorder(mut self, recorder: Arc<dyn ImpressionRecorder>) -> Self {
        self.impressions = Some(recorder);
        self
    }

    pub fn readiness_gate(mut self, gate: Arc<dyn ReadinessGate>) -> Self {
        self.readiness = gate;
        self
    }

    /// Runtime used for worker dispatch when `use_worker_for_decisions` is set.
    pub fn runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> ActionManager {
        let dispatch = match (self.config.use_worker_for_decisions, self.runtime) {
            (true, Some(handle)) => DispatchPolicy::Worker(handle),
            (true, None) => {
                warn!("Worker dispatch requested without a runtime, running passes inline");
                DispatchPolicy::Inline
            }
            (false, _) => DispatchPolicy::Inline,
        };

        info!(
            enabled = self.config.enabled,
            paused = self.config.start_paused,
            dismiss_on_push_opened = self.config.dismiss_on_push_opened,
            dispatch = ?dispatch,
            "Action manager created"
        );

        let config = self.config;
        let shared = Arc::new_cyclic(|this| Shared {
            this: this.clone(),
            queue: ActionQueue::new(),
            delayed_queue: ActionQueue::new(),
            definitions: self.definitions,
            current: Mutex::new(None),
            pass: Mutex::new(PassState::default()),
            scheduler: self.scheduler,
            controller: RwLock::new(self.controller),
            listener: RwLock::new(self.listener),
            suppression: RwLock::new(self.suppression),
            impressions: self.impressions,
            readiness: self.readiness,
            dispatch,
            enabled: AtomicBool::new(config.enabled),
            paused: AtomicBool::new(config.start_paused),
            dismiss_on_push_opened: AtomicBool::new(config.dismiss_on_push_opened),
            continue_on_activity_resumed: AtomicBool::new(config.continue_on_activity_resumed),
        });

        let weak = Arc::downgrade(&shared);
        shared.readiness.subscribe(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                debug!("Readiness gate opened");
                shared.perform_actions();
            }
        }));

        ActionManager { shared }
    }
}

/// Orchestrates the in-app message queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ActionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ActionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionManager")
            .field("queue", &self.shared.queue.len())
            .field("delayed", &self.shared.delayed_queue.len())
            .field("presenting", &self.shared.current.lock().is_some())
            .field("paused", &self.is_paused())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl ActionManager {
    pub fn builder(scheduler: Arc<dyn ActionScheduler>) -> ActionManagerBuilder {
        ActionManagerBuilder::new(scheduler)
    }

    pub fn definitions(&self) -> &Arc<Definitions> {
        &self.shared.definitions
    }

    pub fn define_action(&self, definition: ActionDefinition) -> MessagingResult<()> {
        self.shared.definitions.define(definition)
    }

    /// Queues triggered messages. With a display controller the batch goes through its
    /// prioritization; without one only the first context is kept.
    pub fn trigger(
        &self,
        contexts: Vec<ActionContext>,
        priority: Priority,
        trigger: Option<ActionsTrigger>,
    ) {
        if contexts.is_empty() {
            return;
        }

        let controller = self.shared.controller.read().clone();
        let ordered = match controller {
            Some(controller) => controller.prioritize_messages(contexts, trigger.as_ref()),
            None => contexts.into_iter().take(1).collect(),
        };

        let actions: Vec<Action> = ordered.into_iter().map(Action::create).collect();
        debug!(
            ?priority,
            actions = ?actions.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Triggering actions"
        );

        match priority {
            Priority::High => self.shared.insert_actions(actions),
            Priority::Default => self.shared.append_actions(actions),
        }
    }

    pub fn trigger_one(&self, context: ActionContext, priority: Priority) {
        self.trigger(vec![context], priority, None);
    }

    /// Moves everything held by an indefinite delay back onto the main queue, in order.
    pub fn trigger_delayed_messages(&self) {
        let delayed = self.shared.delayed_queue.pop_all();
        debug!(count = delayed.len(), "Triggering delayed actions");
        self.shared.append_actions(delayed);
    }

    pub fn append_action(&self, action: Action) {
        self.shared.append_action(action);
    }

    pub fn append_actions(&self, actions: Vec<Action>) {
        self.shared.append_actions(actions);
    }

    pub fn insert_action(&self, action: Action) {
        self.shared.insert_action(action);
    }

    pub fn insert_actions(&self, actions: Vec<Action>) {
        self.shared.insert_actions(actions);
    }

    /// Requests a queue pass.
    pub fn process_next(&self) {
        self.shared.perform_actions();
    }

    /// Asks the presenting action's definition to dismiss it. Returns whether a dismiss
    /// handler was invoked.
    pub fn dismiss_current_action(&self) -> bool {
        self.shared.dismiss_current_action()
    }

    /// Re-runs a pass deferred by a closed readiness gate. Gates that support
    /// [`ReadinessGate::subscribe`] call this on their own.
    pub fn notify_ready(&self) {
        debug!("Readiness signalled");
        self.shared.perform_actions();
    }

    /// Paused queues keep accepting actions but stop presenting them.
    pub fn set_paused(&self, paused: bool) {
        self.shared
            .continue_on_activity_resumed
            .store(!paused, Ordering::SeqCst);
        self.shared.paused.store(paused, Ordering::SeqCst);
        info!(paused, "Action queue pause changed");
        if !paused {
            self.shared.perform_actions();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Disabled queues drop new actions and stop presenting.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Action queue enabled changed");
        if enabled {
            self.shared.perform_actions();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn set_dismiss_on_push_opened(&self, flag: bool) {
        self.shared.dismiss_on_push_opened.store(flag, Ordering::SeqCst);
    }

    pub fn dismiss_on_push_opened(&self) -> bool {
        self.shared.dismiss_on_push_opened.load(Ordering::SeqCst)
    }

    pub fn set_continue_on_activity_resumed(&self, flag: bool) {
        self.shared
            .continue_on_activity_resumed
            .store(flag, Ordering::SeqCst);
    }

    /// App moved to the foreground.
    pub fn on_activity_resumed(&self) {
        if self.shared.continue_on_activity_resumed.load(Ordering::SeqCst) {
            self.shared.paused.store(false, Ordering::SeqCst);
            self.shared.perform_actions();
        }
    }

    /// App moved to the background.
    pub fn on_activity_paused(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn set_message_display_controller(
        &self,
        controller: Option<Arc<dyn MessageDisplayController>>,
    ) {
        *self.shared.controller.write() = controller;
    }

    pub fn set_message_display_listener(&self, listener: Option<Arc<dyn MessageDisplayListener>>) {
        *self.shared.listener.write() = listener;
    }

    pub fn set_suppression_policy(&self, policy: Option<Arc<dyn SuppressionPolicy>>) {
        *self.shared.suppression.write() = policy;
    }

    pub fn current_action(&self) -> Option<Action> {
        self.shared
            .current
            .lock()
            .as_ref()
            .map(|p| p.action().clone())
    }

    pub fn current_presentation(&self) -> Option<Presentation> {
        self.shared.current.lock().clone()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.shared.delayed_queue.len()
    }

    /// Whether a queue pass is running or requested.
    pub fn is_processing(&self) -> bool {
        let pass = self.shared.pass.lock();
        pass.running || pass.requested
    }

    pub fn dispatch_policy(&self) -> &DispatchPolicy {
        &self.shared.dispatch
    }
}

#[derive(Default)]
struct PassState {
    running: bool,
    requested: bool,
}

pub(crate) struct Shared {
    this: Weak<Shared>,
    queue: ActionQueue,
    delayed_queue: ActionQueue,
    definitions: Arc<Definitions>,
    current: Mutex<Option<Presentation>>,
    pass: Mutex<PassState>,
    scheduler: Arc<dyn ActionScheduler>,
    controller: RwLock<Option<Arc<dyn MessageDisplayController>>>,
    listener: RwLock<Option<Arc<dyn MessageDisplayListener>>>,
    suppression: RwLock<Option<Arc<dyn SuppressionPolicy>>>,
    impressions: Option<Arc<dyn ImpressionRecorder>>,
    readiness: Arc<dyn ReadinessGate>,
    dispatch: DispatchPolicy,
    enabled: AtomicBool,
    paused: AtomicBool,
    dismiss_on_push_opened: AtomicBool,
    continue_on_activity_resumed: AtomicBool,
}

impl Shared {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn append_action(&self, action: Action) {
        self.append_actions(vec![action]);
    }

    pub(crate) fn append_actions(&self, actions: Vec<Action>) {
        if !self.is_enabled() {
            debug!(count = actions.len(), "Action queue disabled, dropping actions");
            return;
        }
        self.queue.push_back_all(actions);
        self.perform_actions();
    }

    pub(crate) fn insert_action(&self, action: Action) {
        self.insert_actions(vec![action]);
    }

    pub(crate) fn insert_actions(&self, actions: Vec<Action>) {
        if !self.is_enabled() {
            debug!(count = actions.len(), "Action queue disabled, dropping actions");
            return;
        }
        self.queue.push_front_all(actions);
        self.perform_actions();
    }

    /// Requests a pass, starting the pass loop if nobody is running it.
    pub(crate) fn perform_actions(&self) {
        {
            let mut pass = self.pass.lock();
            pass.requested = true;
            if pass.running {
                return;
            }
            pass.running = true;
        }

        match &self.dispatch {
            DispatchPolicy::Inline => self.run_passes(),
            DispatchPolicy::Worker(handle) => match self.this.upgrade() {
                Some(shared) => {
                    handle.spawn_blocking(move || shared.run_passes());
                }
                None => self.pass.lock().running = false,
            },
        }
    }

    fn run_passes(&self) {
        let _guard = PassGuard(&self.pass);
        loop {
            {
                let mut pass = self.pass.lock();
                if !pass.requested {
                    pass.running = false;
                    return;
                }
                pass.requested = false;
            }
            self.perform_pass();
        }
    }

    fn perform_pass(&self) {
        if self.paused.load(Ordering::SeqCst) || !self.is_enabled() {
            return;
        }

        let ready = call_guarded(|| Ok(self.readiness.is_ready())).unwrap_or_else(|e| {
            error!(error = %e, "Readiness gate failed");
            false
        });
        if !ready {
            debug!("Readiness gate closed, deferring queue pass");
            return;
        }

        if self.current.lock().is_some() {
            debug!("Will not pop queue, an action is already presenting");
            self.prioritize_push_notification_actions();
            return;
        }

        let Some(action) = self.queue.pop() else {
            return;
        };
        debug!(action = %action, "Action popped from queue");

        let presentation = Presentation::new(action, self.this.clone());
        *self.current.lock() = Some(presentation.clone());
        let _slot = SlotGuard {
            shared: self,
            presentation: &presentation,
        };

        let action = presentation.action();
        if action.context().is_held_back() {
            info!(action = %action, "Held back message, recording impression only");
            self.record_impression(action, None);
            self.drop_current(&presentation);
            return;
        }

        if action.action_type() == ActionType::Single && self.should_suppress(action.context()) {
            info!(action = %action, "Local message caps reached, suppressing");
            self.drop_current(&presentation);
            return;
        }

        let controller = self.controller.read().clone();
        let choice = match controller {
            Some(controller) => {
                call_guarded(|| Ok(controller.should_display_message(action.context())))
                    .unwrap_or_else(|e| {
                        error!(action = %action, error = %e, "Display controller failed, discarding");
                        Some(MessageDisplayChoice::Discard)
                    })
            }
            None => None,
        }
        .unwrap_or_default();

        match choice {
            MessageDisplayChoice::Discard => {
                debug!(action = %action, "Action discarded");
                self.drop_current(&presentation);
            }
            MessageDisplayChoice::Delay { seconds } => {
                debug!(action = %action, delay_seconds = seconds, "Delaying action");
                if seconds > 0 {
                    self.scheduler.schedule(
                        action.clone(),
                        seconds,
                        ScheduleTarget::new(self.this.clone()),
                    );
                } else {
                    self.delayed_queue.push_back(action.clone());
                }
                self.drop_current(&presentation);
            }
            MessageDisplayChoice::Show => self.present(&presentation),
        }
    }

    fn present(&self, presentation: &Presentation) {
        let context = presentation.context();
        if presentation.is_dismissed() {
            debug!(action = %context, "Action dismissed before presentation");
            self.drop_current(presentation);
            return;
        }

        let definition = self.definitions.find(context.action_name());
        let presented = match definition.as_ref().and_then(|d| d.present_handler()) {
            Some(handler) => match call_guarded(|| handler(presentation)) {
                Ok(presented) => presented,
                Err(e) => {
                    error!(action = %context, error = %e, "Present handler failed");
                    false
                }
            },
            None => {
                warn!(action = %context, "No present handler registered for action");
                false
            }
        };

        if !presented {
            debug!(action = %context, "Action not presented");
            self.drop_current(presentation);
            return;
        }

        if self.is_presenting(presentation) {
            self.record_impression(presentation.action(), definition.as_deref());
            info!(action = %context, "Action presented");
            self.notify_listener("displayed", |l| l.on_message_displayed(context));
        }

        self.perform_actions();
    }

    pub(crate) fn action_did_dismiss(&self, presentation: &Presentation) {
        let context = presentation.context();
        debug!(action = %context, "Action dismissed");
        self.notify_listener("dismissed", |l| l.on_message_dismissed(context));
        self.clear_current(presentation);
        self.perform_actions();
    }

    pub(crate) fn action_did_execute(&self, executed: &ActionContext) {
        debug!(action = %executed, "Action executed");
        self.notify_listener("action_executed", |l| {
            l.on_action_executed(executed.action_name(), executed)
        });
    }

    fn dismiss_current_action(&self) -> bool {
        let Some(current) = self.current.lock().clone() else {
            return false;
        };
        let Some(definition) = self.definitions.find(current.context().action_name()) else {
            return false;
        };
        let Some(handler) = definition.dismiss_handler() else {
            return false;
        };

        debug!(action = %current.context(), "Dismiss requested");
        if let Err(e) = call_guarded(|| handler(&current)) {
            error!(action = %current.context(), error = %e, "Cannot dismiss action");
            current.dismiss();
        }
        true
    }

    /// Dismisses the presenting action when the next queued one was opened from a push
    /// notification.
    fn prioritize_push_notification_actions(&self) {
        if !self.dismiss_on_push_opened.load(Ordering::SeqCst) {
            return;
        }
        if self.queue.first().is_some_and(|next| next.is_notification()) {
            info!("Push notification action queued, dismissing current action");
            self.dismiss_current_action();
        }
    }

    fn should_suppress(&self, context: &ActionContext) -> bool {
        let Some(policy) = self.suppression.read().clone() else {
            return false;
        };
        call_guarded(|| Ok(policy.should_suppress(context))).unwrap_or_else(|e| {
            error!(action = %context, error = %e, "Suppression policy failed");
            false
        })
    }

    fn record_impression(&self, action: &Action, definition: Option<&ActionDefinition>) {
        let Some(recorder) = &self.impressions else {
            return;
        };
        let message_id = action.context().message_id();

        // Action-only chained steps (e.g. an Open URL in a multi-message campaign) are not
        // message impressions.
        let result = call_guarded(|| match action.action_type() {
            ActionType::Chained if definition.map(|d| d.kind()) == Some(ActionKind::ACTION) => {
                recorder.record_chained_action_impression(message_id)
            }
            ActionType::Chained | ActionType::Single => {
                recorder.record_message_impression(message_id)
            }
            ActionType::Embedded => Ok(()),
        });

        if let Err(e) = result {
            error!(action = %action, error = %e, "Failed to record impression");
        }
    }

    fn notify_listener<F>(&self, hook: &str, notify: F)
    where
        F: FnOnce(&dyn MessageDisplayListener) -> anyhow::Result<()>,
    {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            if let Err(e) = call_guarded(|| notify(listener.as_ref())) {
                warn!(hook, error = %e, "Message display listener failed");
            }
        }
    }

    fn is_presenting(&self, presentation: &Presentation) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|current| current.is_same(presentation))
    }

    fn clear_current(&self, presentation: &Presentation) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.is_same(presentation)) {
            *current = None;
        }
    }

    fn drop_current(&self, presentation: &Presentation) {
        presentation.finish();
        self.clear_current(presentation);
        self.perform_actions();
    }
}

/// Resets the pass loop if a pass unwinds, so the next request starts a new one.
struct PassGuard<'a>(&'a Mutex<PassState>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().running = false;
        }
    }
}

/// Frees the slot if deciding on or presenting the popped action unwinds.
struct SlotGuard<'a> {
    shared: &'a Shared,
    presentation: &'a Presentation,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(action = %self.presentation.context(), "Queue pass panicked, releasing action");
            self.presentation.finish();
            self.shared.clear_current(self.presentation);
        }
    }
}

/// Runs a host callback, reporting a panic as [`MessagingError::Handler`].
fn call_guarded<T>(callback: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    catch_unwind(AssertUnwindSafe(callback)).unwrap_or_else(|payload| {
        Err(MessagingError::Handler(format!("panicked: {}", panic_message(payload.as_ref()))).into())
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
