//! Hand-off to the execution layer and the way back.
//!
//! When a task is admitted on a worker the scheduler builds a [`Launch`]
//! and passes it to the [`Dispatcher`]. How the task reaches the worker is
//! the dispatcher's business. Whatever happens, it must eventually call
//! [`CompletionNotifier::completed`] or [`CompletionNotifier::failed`]
//! exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use taskgrid_core::{DataParam, Implementation};
use tracing::debug;

use crate::action::ActionId;

/// Receives completion and error signals for launched actions.
pub trait ActionOrchestrator: Send + Sync {
    fn on_completed(&self, action: ActionId);

    fn on_failed(&self, action: ActionId, cause: String);
}

/// One-shot callback handle given to the execution layer. Clones share the
/// shot: the first `completed` or `failed` across all of them is delivered,
/// later ones are dropped.
#[derive(Clone)]
pub struct CompletionNotifier {
    action: ActionId,
    orchestrator: Weak<dyn ActionOrchestrator>,
    fired: Arc<AtomicBool>,
}

impl CompletionNotifier {
    pub fn new(action: ActionId, orchestrator: Weak<dyn ActionOrchestrator>) -> Self {
        Self {
            action,
            orchestrator,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn action(&self) -> ActionId {
        self.action
    }

    /// A signal went out through this handle or one of its clones.
    pub fn is_spent(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if !first {
            debug!(action = %self.action, "notifier already used, signal dropped");
        }
        first
    }

    pub fn completed(&self) {
        if !self.fire() {
            return;
        }
        match self.orchestrator.upgrade() {
            Some(o) => o.on_completed(self.action),
            None => debug!(action = %self.action, "scheduler gone, completion dropped"),
        }
    }

    pub fn failed(&self, cause: impl Into<String>) {
        if !self.fire() {
            return;
        }
        match self.orchestrator.upgrade() {
            Some(o) => o.on_failed(self.action, cause.into()),
            None => debug!(action = %self.action, "scheduler gone, failure dropped"),
        }
    }
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNotifier").field("action", &self.action).finish()
    }
}

/// A task ready to run on a worker.
#[derive(Debug, Clone)]
pub struct Launch {
    pub action: ActionId,
    pub worker: String,
    pub implementation: Implementation,
    pub params: Vec<DataParam>,
    pub notifier: CompletionNotifier,
}

/// Sends launched tasks to the execution layer.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, launch: Launch);
}
