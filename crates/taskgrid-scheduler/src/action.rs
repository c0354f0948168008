//! Allocatable actions: the unit of work bound to a worker.
//!
//! An action is a kind-specific payload wrapped in a shared state machine:
//!
//! ```text
//!            tryToLaunch                completed()
//! RUNNABLE ──────────────▶ RUNNING ─────────────────▶ FINISHED
//!    │  ▲                    │  │
//!    │  │ capacity freed     │  │ error() + retry
//!    ▼  │ (FIFO drain)       │  └──────────────▶ RUNNABLE
//! WAITING ───────────────────┘
//!                            error() + no retry / predecessor failed
//!                            ─────────────────────────────────▶ FAILED
//! ```
//!
//! Actions reference each other and their worker by id and name only; the
//! [`ActionTable`] owns them.
//!
//! # Locking
//!
//! Each action has two locks. The launch lock is held across the whole
//! RUNNABLE→RUNNING/WAITING decision so exactly one thread launches an
//! action. The state mutex guards the fields below and is innermost:
//! nothing is acquired while holding it. The full order is
//!
//! ```text
//! launch lock -> worker resource lock -> action table lock -> state mutex
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use taskgrid_core::Implementation;
use taskgrid_placement::RunProfile;

use crate::error::{SchedulerError, SchedulerResult};
use crate::kind::ActionKind;
use crate::scheduling_info::SchedulingInformation;

/// Monotonic, never reused action id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    Runnable,
    Waiting,
    Running,
    Finished,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Finished | ActionStatus::Failed)
    }
}

// ── Launch lock ────────────────────────────────────────────────────

/// Explicit mutex/condition pair guarding the launch decision.
#[derive(Debug, Default)]
pub struct LaunchLock {
    locked: Mutex<bool>,
    released: Condvar,
}

pub struct LaunchGuard<'a> {
    lock: &'a LaunchLock,
}

impl LaunchLock {
    /// Block until the lock is free, then take it.
    pub fn acquire(&self) -> LaunchGuard<'_> {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
        LaunchGuard { lock: self }
    }

    pub fn try_acquire(&self) -> Option<LaunchGuard<'_>> {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if *locked {
            return None;
        }
        *locked = true;
        Some(LaunchGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LaunchGuard<'_> {
    fn drop(&mut self) {
        let mut locked = self.lock.locked.lock().unwrap_or_else(PoisonError::into_inner);
        *locked = false;
        self.lock.released.notify_one();
    }
}

// ── Action ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct ActionState {
    pub status: ActionStatus,
    pub data_predecessors: Vec<ActionId>,
    pub data_successors: Vec<ActionId>,
    pub resource: Option<String>,
    pub implementation: Option<Implementation>,
    pub run: Option<RunProfile>,
    /// Context clock (ms) when the current execution started.
    pub started_at: i64,
    pub info: SchedulingInformation,
    /// Failed executions so far.
    pub attempts: u32,
}

#[derive(Debug)]
pub struct AllocatableAction {
    id: ActionId,
    kind: ActionKind,
    launch: LaunchLock,
    state: Mutex<ActionState>,
}

impl AllocatableAction {
    pub(crate) fn new(id: ActionId, kind: ActionKind) -> Self {
        Self {
            id,
            kind,
            launch: LaunchLock::default(),
            state: Mutex::new(ActionState {
                status: ActionStatus::Runnable,
                data_predecessors: Vec::new(),
                data_successors: Vec::new(),
                resource: None,
                implementation: None,
                run: None,
                started_at: 0,
                info: SchedulingInformation::default(),
                attempts: 0,
            }),
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn priority(&self) -> i64 {
        self.kind.priority()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn launch_lock(&self) -> &LaunchLock {
        &self.launch
    }

    /// Another thread is deciding whether to launch this action.
    pub fn is_locked(&self) -> bool {
        self.launch.is_locked()
    }

    pub fn status(&self) -> ActionStatus {
        self.state().status
    }

    pub fn assigned_resource(&self) -> Option<String> {
        self.state().resource.clone()
    }

    pub fn assigned_implementation(&self) -> Option<Implementation> {
        self.state().implementation.clone()
    }

    pub fn data_predecessors(&self) -> Vec<ActionId> {
        self.state().data_predecessors.clone()
    }

    pub fn data_successors(&self) -> Vec<ActionId> {
        self.state().data_successors.clone()
    }

    pub fn has_data_predecessors(&self) -> bool {
        !self.state().data_predecessors.is_empty()
    }

    pub fn resource_predecessors(&self) -> Vec<ActionId> {
        self.state().info.resource_predecessors().to_vec()
    }

    pub fn resource_successors(&self) -> Vec<ActionId> {
        self.state().info.resource_successors().to_vec()
    }

    pub fn is_executable(&self) -> bool {
        self.state().info.is_executable()
    }

    pub fn enforced_target(&self) -> Option<String> {
        self.state().info.enforced_target().map(str::to_string)
    }

    /// Expected (start, end) on the current worker's timeline.
    pub fn expectations(&self) -> (i64, i64) {
        let s = self.state();
        (s.info.expected_start(), s.info.expected_end())
    }

    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    /// Bind the action to a worker and implementation. Terminal actions
    /// keep their links.
    pub(crate) fn assign(&self, resource: &str, implementation: Implementation) -> bool {
        let mut s = self.state();
        if s.status.is_terminal() {
            return false;
        }
        s.resource = Some(resource.to_string());
        s.implementation = Some(implementation);
        true
    }

    pub(crate) fn unassign(&self) {
        let mut s = self.state();
        if s.status.is_terminal() {
            return;
        }
        s.resource = None;
        s.implementation = None;
        s.info.reset();
    }
}

// ── Action table ───────────────────────────────────────────────────

/// Owner of every action, keyed by id.
#[derive(Default)]
pub struct ActionTable {
    actions: RwLock<HashMap<ActionId, Arc<AllocatableAction>>>,
}

impl ActionTable {
    pub fn insert(&self, action: AllocatableAction) -> Arc<AllocatableAction> {
        let action = Arc::new(action);
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action.id(), action.clone());
        action
    }

    pub fn get(&self, id: ActionId) -> SchedulerResult<Arc<AllocatableAction>> {
        self.find(id).ok_or(SchedulerError::ActionNotFound(id))
    }

    pub fn find(&self, id: ActionId) -> Option<Arc<AllocatableAction>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop finished and failed actions. Returns how many were removed.
    pub fn prune_terminal(&self) -> usize {
        let mut actions = self.actions.write().unwrap_or_else(PoisonError::into_inner);
        let before = actions.len();
        actions.retain(|_, a| !a.status().is_terminal());
        before - actions.len()
    }
}
