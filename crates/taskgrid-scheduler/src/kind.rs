//! Action kinds and their capabilities.
//!
//! Every action shares one state machine; what differs per kind is a small
//! set of capabilities: priority, whether it reserves and releases worker
//! capacity, which implementations it can use, and how it reacts to an
//! execution error. Elasticity kinds always carry the maximum priority.

use std::sync::Arc;

use taskgrid_autoscale::ResourceUpdate;
use taskgrid_core::{CoreId, DataParam, Implementation, ResourceDescription, WorkerDescription};

/// Core id shared by the synthetic implementations of elasticity actions.
pub const ELASTICITY_CORE: CoreId = CoreId::MAX;

/// Priority of every elasticity action.
pub const ELASTICITY_PRIORITY: i64 = i32::MAX as i64;

/// What to do when a task's execution reports an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnFailure {
    /// Run again, up to the configured number of retries, then fail.
    #[default]
    Retry,
    /// Fail immediately and cascade to data successors.
    Fail,
    /// Treat the execution as finished and release successors.
    Ignore,
}

/// Outcome of an action's error hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    Retry,
    Ignore,
    Fail,
}

/// An application task.
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub core_id: CoreId,
    pub params: Vec<DataParam>,
    pub high_priority: bool,
    pub on_failure: OnFailure,
}

impl TaskPayload {
    pub fn new(core_id: CoreId) -> Self {
        Self {
            core_id,
            params: Vec::new(),
            high_priority: false,
            on_failure: OnFailure::default(),
        }
    }

    pub fn with_params(mut self, params: Vec<DataParam>) -> Self {
        self.params = params;
        self
    }

    pub fn high_priority(mut self) -> Self {
        self.high_priority = true;
        self
    }

    pub fn on_failure(mut self, policy: OnFailure) -> Self {
        self.on_failure = policy;
        self
    }
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Task(TaskPayload),
    /// Bring a new, empty worker into the pool.
    StartWorker { worker: WorkerDescription },
    /// Drain a worker, save its unique data and remove it.
    StopWorker { capacity: ResourceDescription },
    /// Take part of a worker's capacity away.
    ReduceWorker { update: Arc<ResourceUpdate> },
    /// Hold capacity until a paired update completes elsewhere.
    BusyWorker { update: Arc<ResourceUpdate> },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Task(_) => "task",
            ActionKind::StartWorker { .. } => "start-worker",
            ActionKind::StopWorker { .. } => "stop-worker",
            ActionKind::ReduceWorker { .. } => "reduce-worker",
            ActionKind::BusyWorker { .. } => "busy-worker",
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, ActionKind::Task(_))
    }

    pub fn is_elasticity(&self) -> bool {
        !self.is_task()
    }

    pub fn priority(&self) -> i64 {
        match self {
            ActionKind::Task(t) => i64::from(t.high_priority),
            _ => ELASTICITY_PRIORITY,
        }
    }

    /// Claims worker capacity while running.
    pub fn reserves_resources(&self) -> bool {
        !matches!(self, ActionKind::StartWorker { .. })
    }

    /// Gives the claimed capacity back on completion. Reductions and busy
    /// holds hand it to the resource update instead; a stopped worker is
    /// gone anyway.
    pub fn releases_resources(&self) -> bool {
        matches!(self, ActionKind::Task(_) | ActionKind::StartWorker { .. })
    }

    /// May launch on a worker that is already being removed.
    pub fn stops_resource(&self) -> bool {
        matches!(self, ActionKind::StopWorker { .. })
    }

    pub fn params(&self) -> &[DataParam] {
        match self {
            ActionKind::Task(t) => &t.params,
            _ => &[],
        }
    }

    /// The single synthetic implementation of an elasticity action.
    pub fn elasticity_implementation(&self) -> Option<Implementation> {
        let (impl_id, signature, requirements) = match self {
            ActionKind::Task(_) => return None,
            ActionKind::StartWorker { .. } => (0, "taskgrid.StartWorker", ResourceDescription::default()),
            ActionKind::StopWorker { capacity } => (1, "taskgrid.StopWorker", *capacity),
            ActionKind::ReduceWorker { update } => (2, "taskgrid.ReduceWorker", *update.modification()),
            ActionKind::BusyWorker { update } => (3, "taskgrid.BusyWorker", *update.modification()),
        };
        Some(Implementation::new(ELASTICITY_CORE, impl_id, signature, requirements))
    }

    /// Error hook. `attempts` counts executions that already failed,
    /// including the current one.
    pub fn on_error(&self, attempts: u32, max_retries: u32) -> ErrorDecision {
        match self {
            ActionKind::Task(_) => match self.on_failure() {
                OnFailure::Retry if attempts <= max_retries => ErrorDecision::Retry,
                OnFailure::Retry | OnFailure::Fail => ErrorDecision::Fail,
                OnFailure::Ignore => ErrorDecision::Ignore,
            },
            ActionKind::BusyWorker { .. } => ErrorDecision::Retry,
            // Pool errors go back to whoever asked for the change.
            ActionKind::StartWorker { .. } | ActionKind::StopWorker { .. } | ActionKind::ReduceWorker { .. } => {
                ErrorDecision::Fail
            }
        }
    }

    /// Declared on-failure policy. Elasticity actions always report retry,
    /// even when their error hook refuses to retry automatically.
    pub fn on_failure(&self) -> OnFailure {
        match self {
            ActionKind::Task(t) => t.on_failure,
            _ => OnFailure::Retry,
        }
    }
}
