//! Pending resource updates.
//!
//! A [`ResourceUpdate`] describes capacity being added to or removed from a
//! worker. Reductions take time (running actions must drain first), so the
//! update carries a completion barrier: any thread may block on
//! [`ResourceUpdate::wait`] until whoever applies the update calls
//! [`ResourceUpdate::complete`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use taskgrid_core::ResourceDescription;

static NEXT_UPDATE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Increase,
    Reduce,
}

#[derive(Debug)]
pub struct ResourceUpdate {
    id: u64,
    kind: UpdateKind,
    modification: ResourceDescription,
    outcome: Mutex<Option<Result<(), String>>>,
    finished: Condvar,
}

impl ResourceUpdate {
    fn new(kind: UpdateKind, modification: ResourceDescription) -> Self {
        Self {
            id: NEXT_UPDATE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            modification,
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    pub fn increase(modification: ResourceDescription) -> Self {
        Self::new(UpdateKind::Increase, modification)
    }

    /// A pending reduction.
    pub fn reduce(modification: ResourceDescription) -> Self {
        Self::new(UpdateKind::Reduce, modification)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    pub fn modification(&self) -> &ResourceDescription {
        &self.modification
    }

    /// Release every waiter. Only the first outcome is kept.
    pub fn complete(&self, outcome: Result<(), String>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(outcome);
            self.finished.notify_all();
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Block until the update is complete.
    pub fn wait(&self) -> Result<(), String> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.finished.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), String>> {
        let slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = self
            .finished
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }
}
