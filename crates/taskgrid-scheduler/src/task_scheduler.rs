//! Task scheduler: the cluster-wide orchestrator.
//!
//! The `TaskScheduler` owns every action and every worker's
//! [`ResourceScheduler`], places actions on workers, launches them, and
//! reacts to completion and error signals from the execution layer.
//!
//! # Flow
//!
//! ```text
//! submit ──▶ select(worker, implementation) ──▶ ResourceScheduler::schedule_action
//!                                                   │
//!                    try_to_launch ◀─────────────────┘
//!                      │ admit
//!          ┌───────────┴────────────┐
//!       RUNNING                  WAITING (worker queue)
//!          │ dispatch                │ drained when capacity returns
//!          ▼                         ▼
//!   completed / failed  ──▶  release, drain, free successors, reschedule
//! ```
//!
//! Actions with no compatible worker are parked and re-evaluated whenever
//! the pool gains capability.
//!
//! Under the order-strict policy free tasks are not placed as they arrive.
//! They wait in one pool-wide queue ordered by priority, then id, and only
//! the head may start. A head with no room anywhere holds back everything
//! behind it. Scheduler-level maps are held only long
//! enough to clone what they contain, so they never take part in the
//! action lock order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use taskgrid_autoscale::{PoolLoad, Provisioner, ProvisioningPool};
use taskgrid_core::config::{SchedulerConfig, SchedulingPolicy};
use taskgrid_core::{CoreElement, Implementation, WorkerDescription};
use taskgrid_placement::{Profile, Score};
use taskgrid_state::{ProfileSnapshot, ResourceProfiles, StateStore};
use tracing::{debug, info, warn};

use crate::action::{ActionId, ActionStatus, ActionTable, AllocatableAction};
use crate::context::SchedulingContext;
use crate::dispatch::{ActionOrchestrator, CompletionNotifier, Dispatcher, Launch};
use crate::error::{SchedulerError, SchedulerResult};
use crate::kind::{ActionKind, ErrorDecision, TaskPayload};
use crate::resource::{Admission, Release, ResourceScheduler, WorkerLifecycle, data_ready_at};

/// Result of a launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Running,
    /// Queued on its worker until capacity frees up.
    Waiting,
    /// Unassigned, not runnable, or still gated by a predecessor.
    NotReady,
}

/// What an execution error turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Placed again for another attempt.
    Retried,
    /// Treated as finished; carries the data successors it released.
    Ignored(Vec<ActionId>),
    /// Every action that failed as a consequence, the erroring one first.
    Failed(Vec<ActionId>),
}

/// Result of offering the head of the order-strict queue a worker.
enum InOrder {
    Started(Option<Arc<ResourceScheduler>>),
    /// Already placed elsewhere or no longer free.
    Stale,
    NoRoom,
}

pub(crate) struct Provisioning {
    pub provisioner: Arc<dyn Provisioner>,
    pub pool: ProvisioningPool,
}

pub struct TaskSchedulerBuilder {
    dispatcher: Arc<dyn Dispatcher>,
    config: SchedulerConfig,
    ctx: Option<Arc<SchedulingContext>>,
    provisioning: Option<Provisioning>,
    store: Option<StateStore>,
}

impl TaskSchedulerBuilder {
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, ctx: Arc<SchedulingContext>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Run elasticity actions through `provisioner`. Without one they
    /// complete as soon as they launch.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>, pool: ProvisioningPool) -> Self {
        self.provisioning = Some(Provisioning { provisioner, pool });
        self
    }

    /// Persist profiles in `store` and warm up from what it already holds.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> SchedulerResult<Arc<TaskScheduler>> {
        let ctx = self.ctx.unwrap_or_default();
        if let Some(store) = &self.store {
            let retired = store.retired_profiles()?;
            ctx.retire_profiles(&retired.into_iter().collect());
        }
        Ok(Arc::new_cyclic(|me| TaskScheduler {
            ctx,
            config: self.config,
            actions: ActionTable::default(),
            workers: RwLock::new(BTreeMap::new()),
            blocked: Mutex::new(Vec::new()),
            ordered: Mutex::new(BTreeSet::new()),
            dispatcher: self.dispatcher,
            provisioning: self.provisioning,
            store: self.store,
            self_ref: me.clone(),
        }))
    }
}

pub struct TaskScheduler {
    ctx: Arc<SchedulingContext>,
    config: SchedulerConfig,
    actions: ActionTable,
    workers: RwLock<BTreeMap<String, Arc<ResourceScheduler>>>,
    /// Actions no worker in the pool can run.
    blocked: Mutex<Vec<ActionId>>,
    /// Free tasks waiting their turn under the order-strict policy.
    ordered: Mutex<BTreeSet<(Reverse<i64>, ActionId)>>,
    dispatcher: Arc<dyn Dispatcher>,
    pub(crate) provisioning: Option<Provisioning>,
    store: Option<StateStore>,
    self_ref: Weak<TaskScheduler>,
}

impl TaskScheduler {
    pub fn builder(dispatcher: Arc<dyn Dispatcher>) -> TaskSchedulerBuilder {
        TaskSchedulerBuilder {
            dispatcher,
            config: SchedulerConfig::default(),
            ctx: None,
            provisioning: None,
            store: None,
        }
    }

    pub fn context(&self) -> &Arc<SchedulingContext> {
        &self.ctx
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn worker(&self, name: &str) -> Option<Arc<ResourceScheduler>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub(crate) fn require_worker(&self, name: &str) -> SchedulerResult<Arc<ResourceScheduler>> {
        self.worker(name)
            .ok_or_else(|| SchedulerError::WorkerNotFound(name.to_string()))
    }

    pub(crate) fn workers(&self) -> Vec<Arc<ResourceScheduler>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn notifier(&self, action: ActionId) -> CompletionNotifier {
        let orchestrator: Weak<dyn ActionOrchestrator> = self.self_ref.clone();
        CompletionNotifier::new(action, orchestrator)
    }

    // ── Graph building ─────────────────────────────────────────────

    pub fn create_task(&self, payload: TaskPayload) -> ActionId {
        let action = self.create_action(ActionKind::Task(payload));
        debug!(action = %action.id(), "task created");
        action.id()
    }

    pub(crate) fn create_action(&self, kind: ActionKind) -> Arc<AllocatableAction> {
        self.actions
            .insert(AllocatableAction::new(self.ctx.next_action_id(), kind))
    }

    /// `successor` may not start before `predecessor` finishes. A finished
    /// predecessor adds no edge.
    pub fn add_data_dependency(&self, predecessor: ActionId, successor: ActionId) -> SchedulerResult<()> {
        let pred = self.actions.get(predecessor)?;
        let succ = self.actions.get(successor)?;
        {
            let s = succ.state();
            if s.status != ActionStatus::Runnable || s.resource.is_some() {
                return Err(SchedulerError::InvalidState {
                    action: successor,
                    status: s.status,
                    expected: "runnable and unscheduled",
                });
            }
        }

        // Successor side first: a predecessor finishing in between still
        // finds the edge it has to remove.
        {
            let mut s = succ.state();
            if !s.data_predecessors.contains(&predecessor) {
                s.data_predecessors.push(predecessor);
            }
        }
        let status = {
            let mut p = pred.state();
            if !p.status.is_terminal() && !p.data_successors.contains(&successor) {
                p.data_successors.push(successor);
            }
            p.status
        };
        if status.is_terminal() {
            succ.state().data_predecessors.retain(|p| *p != predecessor);
            if status == ActionStatus::Failed {
                return Err(SchedulerError::InvalidState {
                    action: predecessor,
                    status,
                    expected: "not failed",
                });
            }
        }
        Ok(())
    }

    pub fn set_enforced_target(&self, id: ActionId, worker: &str) -> SchedulerResult<()> {
        self.actions.get(id)?.state().info.set_enforced_target(worker);
        Ok(())
    }

    /// `id` must run on whichever worker `predecessor` is placed on.
    pub fn add_constraining_predecessor(&self, id: ActionId, predecessor: ActionId) -> SchedulerResult<()> {
        self.actions.get(predecessor)?;
        self.actions.get(id)?.state().info.add_constraining_predecessor(predecessor);
        Ok(())
    }

    // ── Submission ─────────────────────────────────────────────────

    /// Add a runnable action. `score` replaces the action's own priority
    /// score when comparing placements.
    pub fn submit(&self, id: ActionId, score: Option<Score>) -> SchedulerResult<()> {
        let action = self.actions.get(id)?;
        self.place_and_launch(&action, None, score)
    }

    pub fn submit_task(&self, payload: TaskPayload) -> SchedulerResult<ActionId> {
        let id = self.create_task(payload);
        self.submit(id, None)?;
        Ok(id)
    }

    /// Place `id` on one of `candidates` only.
    pub fn schedule_on(&self, id: ActionId, candidates: &[String]) -> SchedulerResult<()> {
        let action = self.actions.get(id)?;
        self.place_and_launch(&action, Some(candidates), None)
    }

    pub(crate) fn place_and_launch(
        &self,
        action: &Arc<AllocatableAction>,
        candidates: Option<&[String]>,
        score: Option<Score>,
    ) -> SchedulerResult<()> {
        let in_order = candidates.is_none() && self.takes_turns(action);
        {
            let guard = action.launch_lock().acquire();
            {
                let s = action.state();
                if s.status != ActionStatus::Runnable || s.resource.is_some() {
                    return Ok(());
                }
                if !self.config.policy.places_early() && !s.data_predecessors.is_empty() {
                    debug!(action = %action.id(), "waiting for data predecessors");
                    return Ok(());
                }
            }
            if in_order {
                drop(guard);
                self.enqueue_in_order(action);
                self.launch_in_order();
                return Ok(());
            }
            match self.place(action, candidates, score) {
                Ok(()) => {}
                Err(SchedulerError::Blocked(id)) => {
                    self.park(id);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        self.launch(action);
        Ok(())
    }

    /// Pick a worker and implementation, assign them and put the action on
    /// the worker's timeline. The caller holds the launch lock.
    fn place(&self, action: &AllocatableAction, candidates: Option<&[String]>, score: Option<Score>) -> SchedulerResult<()> {
        let (worker, implementation) = self.select(action, candidates, score)?;
        action.assign(worker.name(), implementation);
        let ready_at = data_ready_at(&self.actions, action, self.ctx.now_ms());
        worker.schedule_action(&self.actions, action, ready_at);
        Ok(())
    }

    fn select(
        &self,
        action: &AllocatableAction,
        candidates: Option<&[String]>,
        score: Option<Score>,
    ) -> SchedulerResult<(Arc<ResourceScheduler>, Implementation)> {
        let id = action.id();
        let refuse = || match candidates {
            Some(_) => SchedulerError::Unassigned(id),
            None => SchedulerError::Blocked(id),
        };

        let mut names = match candidates {
            Some(c) => c.to_vec(),
            None => self.compatible_workers(action),
        };
        if let Some(target) = self.required_worker(action) {
            if !names.contains(&target) {
                return Err(refuse());
            }
            names = vec![target];
        }

        let base = score.unwrap_or_else(|| Score::for_action(action.priority()));
        let implementations = self.implementations_for(action);
        let params = action.kind().params();
        let mut best: Option<(Score, Arc<ResourceScheduler>, Implementation)> = None;
        for name in names {
            let Some(worker) = self.worker(&name) else {
                continue;
            };
            if !Self::accepts(&worker, action.kind()) {
                continue;
            }
            for implementation in &implementations {
                if !worker.can_host(implementation) {
                    continue;
                }
                let score = worker.score(base, params, implementation);
                if Score::is_better_opt(Some(&score), best.as_ref().map(|(s, _, _)| s)) {
                    best = Some((score, worker.clone(), implementation.clone()));
                }
            }
        }
        best.map(|(_, w, i)| (w, i)).ok_or_else(refuse)
    }

    fn accepts(worker: &ResourceScheduler, kind: &ActionKind) -> bool {
        match worker.lifecycle() {
            WorkerLifecycle::Running => true,
            WorkerLifecycle::Removed => false,
            _ => kind.is_elasticity(),
        }
    }

    fn compatible_workers(&self, action: &AllocatableAction) -> Vec<String> {
        match action.kind() {
            ActionKind::Task(task) => self.ctx.workers_for(task.core_id),
            _ => action.enforced_target().into_iter().collect(),
        }
    }

    fn implementations_for(&self, action: &AllocatableAction) -> Vec<Implementation> {
        match action.kind() {
            ActionKind::Task(task) => self.ctx.implementations(task.core_id),
            kind => kind.elasticity_implementation().into_iter().collect(),
        }
    }

    /// Enforced target, or the worker of an already placed constraining
    /// predecessor.
    fn required_worker(&self, action: &AllocatableAction) -> Option<String> {
        if let Some(target) = action.enforced_target() {
            return Some(target);
        }
        let constraints = action.state().info.constraining_predecessors().to_vec();
        constraints
            .into_iter()
            .filter_map(|p| self.actions.find(p))
            .find_map(|p| p.assigned_resource())
    }

    fn park(&self, id: ActionId) {
        let mut blocked = self.blocked.lock().unwrap_or_else(PoisonError::into_inner);
        if !blocked.contains(&id) {
            blocked.push(id);
            info!(action = %id, "no compatible worker, action blocked");
        }
    }

    /// Place every parked action again.
    pub(crate) fn retry_blocked(&self) {
        let parked = std::mem::take(&mut *self.blocked.lock().unwrap_or_else(PoisonError::into_inner));
        if !parked.is_empty() {
            debug!(count = parked.len(), "re-evaluating blocked actions");
        }
        for id in parked {
            let Some(action) = self.actions.find(id) else {
                continue;
            };
            if let Err(e) = self.place_and_launch(&action, None, None) {
                warn!(action = %id, error = %e, "blocked action could not be placed");
            }
        }
        self.launch_in_order();
    }

    // ── Order-strict queue ─────────────────────────────────────────

    fn takes_turns(&self, action: &AllocatableAction) -> bool {
        self.config.policy == SchedulingPolicy::OrderStrict && action.kind().is_task()
    }

    fn enqueue_in_order(&self, action: &AllocatableAction) {
        self.ordered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((Reverse(action.priority()), action.id()));
        debug!(action = %action.id(), "task queued for its turn");
    }

    /// Start queued tasks from the head while the head finds room. The
    /// queue lock is held across admission so two callers cannot start
    /// tasks out of turn; dispatch happens after it is released.
    pub(crate) fn launch_in_order(&self) {
        if self.config.policy != SchedulingPolicy::OrderStrict {
            return;
        }
        let mut started = Vec::new();
        let mut conflicting = Vec::new();
        {
            let mut ordered = self.ordered.lock().unwrap_or_else(PoisonError::into_inner);
            while let Some(&(_, id)) = ordered.first() {
                let Some(action) = self.actions.find(id) else {
                    ordered.pop_first();
                    continue;
                };
                match self.start_in_order(&action) {
                    Ok(InOrder::NoRoom) => break,
                    Ok(InOrder::Started(worker)) => {
                        if let Some(worker) = worker {
                            started.push((action, worker));
                        }
                    }
                    Ok(InOrder::Stale) => {}
                    Err(SchedulerError::Blocked(id)) => self.park(id),
                    Err(SchedulerError::SchedulingConflict { reason, .. }) => {
                        warn!(action = %id, %reason, "invalid scheduling");
                        conflicting.push(action);
                    }
                    Err(e) => warn!(action = %id, error = %e, "queued task could not be started"),
                }
                ordered.pop_first();
            }
        }
        for (action, worker) in &started {
            self.do_action(action, worker);
        }
        for action in &conflicting {
            self.reschedule(action);
        }
    }

    /// Place and admit `action` if some worker can take it right now.
    fn start_in_order(&self, action: &Arc<AllocatableAction>) -> SchedulerResult<InOrder> {
        {
            let _guard = action.launch_lock().acquire();
            {
                let s = action.state();
                if s.status != ActionStatus::Runnable || s.resource.is_some() || !s.data_predecessors.is_empty() {
                    return Ok(InOrder::Stale);
                }
            }
            let (worker, implementation) = self.select(action, None, None)?;
            if !worker.has_room(&implementation.requirements) {
                return Ok(InOrder::NoRoom);
            }
            action.assign(worker.name(), implementation);
            let ready_at = data_ready_at(&self.actions, action, self.ctx.now_ms());
            worker.schedule_action(&self.actions, action, ready_at);
        }
        let (_, worker) = self.launch_locked(action)?;
        Ok(InOrder::Started(worker))
    }

    /// Tasks waiting for their turn, head first.
    pub fn queued_in_order(&self) -> Vec<ActionId> {
        self.ordered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }

    // ── Launching ──────────────────────────────────────────────────

    /// Launch `id` if it is assigned, runnable and free of predecessors.
    ///
    /// A scheduling conflict is returned as an error and leaves the action
    /// where it is. Launches the scheduler starts itself place conflicting
    /// tasks again.
    pub fn try_to_launch(&self, id: ActionId) -> SchedulerResult<LaunchOutcome> {
        let action = self.actions.get(id)?;
        let (outcome, worker) = self.launch_locked(&action)?;
        if let Some(worker) = worker {
            self.do_action(&action, &worker);
        }
        Ok(outcome)
    }

    fn launch_locked(&self, action: &AllocatableAction) -> SchedulerResult<(LaunchOutcome, Option<Arc<ResourceScheduler>>)> {
        let _guard = action.launch_lock().acquire();
        let resource = {
            let s = action.state();
            let Some(resource) = s.resource.clone() else {
                return Ok((LaunchOutcome::NotReady, None));
            };
            if s.status != ActionStatus::Runnable || !s.data_predecessors.is_empty() || !s.info.is_executable() {
                return Ok((LaunchOutcome::NotReady, None));
            }
            resource
        };
        let worker = self.check_placement(action, &resource)?;
        Ok(match worker.admit(action, self.ctx.now_ms())? {
            Admission::Running => (LaunchOutcome::Running, Some(worker)),
            Admission::Waiting => (LaunchOutcome::Waiting, None),
        })
    }

    fn check_placement(&self, action: &AllocatableAction, resource: &str) -> SchedulerResult<Arc<ResourceScheduler>> {
        let conflict = |reason: String| SchedulerError::SchedulingConflict {
            action: action.id(),
            reason,
        };
        if let Some(target) = action.enforced_target()
            && target != resource
        {
            return Err(conflict(format!("enforced on {target}, assigned to {resource}")));
        }
        let constraints = action.state().info.constraining_predecessors().to_vec();
        for p in constraints {
            if let Some(pred) = self.actions.find(p)
                && let Some(theirs) = pred.assigned_resource()
                && theirs != resource
            {
                return Err(conflict(format!("must share worker {theirs} with {p}")));
            }
        }
        match self.worker(resource) {
            Some(worker) if worker.lifecycle() != WorkerLifecycle::Removed => Ok(worker),
            _ => Err(conflict(format!("worker {resource} is gone"))),
        }
    }

    /// Launch with recovery: conflicting tasks are placed again,
    /// conflicting elasticity actions fail.
    pub(crate) fn launch(&self, action: &Arc<AllocatableAction>) {
        match self.launch_locked(action) {
            Ok((LaunchOutcome::Running, Some(worker))) => self.do_action(action, &worker),
            Ok(_) => {}
            Err(SchedulerError::SchedulingConflict { reason, .. }) => {
                warn!(action = %action.id(), %reason, "invalid scheduling");
                if action.kind().is_elasticity() {
                    self.fail_cascade(action, &reason);
                } else {
                    self.reschedule(action);
                }
            }
            Err(e) => warn!(action = %action.id(), error = %e, "launch failed"),
        }
    }

    pub(crate) fn launch_ids(&self, ids: Vec<ActionId>) {
        for id in ids {
            if let Some(action) = self.actions.find(id) {
                self.launch(&action);
            }
        }
    }

    pub(crate) fn do_action(&self, action: &Arc<AllocatableAction>, worker: &Arc<ResourceScheduler>) {
        let ActionKind::Task(task) = action.kind() else {
            self.run_elasticity(action, worker);
            return;
        };
        let Some(implementation) = action.assigned_implementation() else {
            return;
        };
        info!(
            action = %action.id(),
            worker = %worker.name(),
            signature = %implementation.signature,
            "task launched"
        );
        self.dispatcher.dispatch(Launch {
            action: action.id(),
            worker: worker.name().to_string(),
            implementation,
            params: task.params.clone(),
            notifier: self.notifier(action.id()),
        });
    }

    pub(crate) fn reschedule(&self, action: &Arc<AllocatableAction>) {
        let mut freed = Vec::new();
        let placed = {
            let guard = action.launch_lock().acquire();
            if !matches!(action.status(), ActionStatus::Runnable | ActionStatus::Waiting) {
                return;
            }
            if let Some(resource) = action.assigned_resource() {
                match self.worker(&resource) {
                    Some(worker) => match worker.withdraw(&self.actions, action) {
                        Some(f) => freed = f,
                        None => return,
                    },
                    None => action.state().status = ActionStatus::Runnable,
                }
                action.unassign();
            }
            if self.takes_turns(action) {
                drop(guard);
                self.launch_ids(freed);
                self.enqueue_in_order(action);
                self.launch_in_order();
                return;
            }
            self.place(action, None, None)
        };
        self.launch_ids(freed);
        match placed {
            Ok(()) => self.launch(action),
            Err(SchedulerError::Blocked(id)) => self.park(id),
            Err(e) => warn!(action = %action.id(), error = %e, "action could not be placed again"),
        }
    }

    /// Move a queued action from `donor` to `receiver`. Gives up if someone
    /// else is launching it or it is no longer queued on `donor`.
    pub(crate) fn donate(
        &self,
        action: &Arc<AllocatableAction>,
        donor: &ResourceScheduler,
        receiver: &ResourceScheduler,
        implementation: Implementation,
    ) -> bool {
        let freed = {
            let Some(_guard) = action.launch_lock().try_acquire() else {
                return false;
            };
            if action.assigned_resource().as_deref() != Some(donor.name()) {
                return false;
            }
            let Some(freed) = donor.withdraw_queued(&self.actions, action) else {
                return false;
            };
            action.unassign();
            action.assign(receiver.name(), implementation);
            let ready_at = data_ready_at(&self.actions, action, self.ctx.now_ms());
            receiver.schedule_action(&self.actions, action, ready_at);
            freed
        };
        self.launch_ids(freed);
        self.launch(action);
        true
    }

    // ── Notifications ──────────────────────────────────────────────

    /// The execution of `id` succeeded. Returns the data successors it
    /// released.
    pub fn action_completed(&self, id: ActionId) -> SchedulerResult<Vec<ActionId>> {
        let action = self.actions.get(id)?;
        let (run, implementation, resource) = {
            let mut s = action.state();
            if s.status != ActionStatus::Running {
                return Err(SchedulerError::InvalidState {
                    action: id,
                    status: s.status,
                    expected: "running",
                });
            }
            s.status = ActionStatus::Finished;
            (s.run.take(), s.implementation.clone(), s.resource.clone())
        };
        debug!(action = %id, kind = action.kind().name(), "action finished");

        let worker = resource.as_deref().and_then(|r| self.worker(r));
        let mut resource_free = Vec::new();
        let mut drained = Vec::new();
        if let Some(worker) = &worker {
            resource_free = worker.unschedule_action(&self.actions, id);
            drained = worker.finish(&self.actions, id, Self::release_mode(action.kind()));
            if action.kind().is_task()
                && let (Some(run), Some(implementation)) = (run, &implementation)
            {
                let profile = worker.profiled_execution(&implementation.signature, run.elapsed_ms());
                self.persist_profile(worker.name(), &implementation.signature, &profile);
            }
        }

        self.elasticity_completed(&action, worker.as_ref());
        let freed = self.release_data_successors(&action);

        if let Some(worker) = &worker {
            for next in &drained {
                self.do_action(next, worker);
            }
        }
        self.launch_ids(resource_free);
        let released = freed.iter().map(|a| a.id()).collect();
        self.schedule_free(freed);
        self.launch_in_order();
        Ok(released)
    }

    /// The execution of `id` reported an error.
    pub fn action_failed(&self, id: ActionId, cause: impl Into<String>) -> SchedulerResult<FailureOutcome> {
        let cause = cause.into();
        let action = self.actions.get(id)?;
        let (attempts, resource) = {
            let mut s = action.state();
            if s.status != ActionStatus::Running {
                return Err(SchedulerError::InvalidState {
                    action: id,
                    status: s.status,
                    expected: "running",
                });
            }
            s.status = ActionStatus::Runnable;
            s.run = None;
            s.attempts += 1;
            (s.attempts, s.resource.clone())
        };
        warn!(action = %id, attempts, %cause, "action execution error");

        if let Some(worker) = resource.as_deref().and_then(|r| self.worker(r)) {
            let resource_free = worker.unschedule_action(&self.actions, id);
            let drained = worker.finish(&self.actions, id, Release::Free);
            for next in &drained {
                self.do_action(next, &worker);
            }
            self.launch_ids(resource_free);
        }
        self.launch_in_order();

        match action.kind().on_error(attempts, self.config.max_task_retries) {
            ErrorDecision::Retry => {
                info!(action = %id, attempts, "retrying action");
                self.reschedule(&action);
                Ok(FailureOutcome::Retried)
            }
            ErrorDecision::Ignore => {
                action.state().status = ActionStatus::Finished;
                let freed = self.release_data_successors(&action);
                let released = freed.iter().map(|a| a.id()).collect();
                self.schedule_free(freed);
                Ok(FailureOutcome::Ignored(released))
            }
            ErrorDecision::Fail => Ok(FailureOutcome::Failed(self.fail_cascade(&action, &cause))),
        }
    }

    fn release_mode(kind: &ActionKind) -> Release {
        match kind {
            ActionKind::BusyWorker { update } => Release::Hold(update.id()),
            kind if kind.releases_resources() => Release::Free,
            _ => Release::Destroy,
        }
    }

    fn persist_profile(&self, worker: &str, signature: &str, profile: &Profile) {
        if let Some(store) = &self.store
            && let Err(e) = store.put_profile(worker, signature, profile)
        {
            warn!(%worker, %signature, error = %e, "could not persist profile");
        }
    }

    /// Drop `action` from its successors' predecessor lists. Returns the
    /// successors left with none. The successor list is consumed.
    fn release_data_successors(&self, action: &AllocatableAction) -> Vec<Arc<AllocatableAction>> {
        let successors = std::mem::take(&mut action.state().data_successors);
        let mut freed = Vec::new();
        for id in successors {
            let Some(successor) = self.actions.find(id) else {
                continue;
            };
            let ready = {
                let mut s = successor.state();
                s.data_predecessors.retain(|p| *p != action.id());
                s.data_predecessors.is_empty() && s.status == ActionStatus::Runnable
            };
            if ready {
                freed.push(successor);
            }
        }
        freed
    }

    /// Place and launch newly free actions, best priority first, then by id.
    fn schedule_free(&self, mut freed: Vec<Arc<AllocatableAction>>) {
        freed.sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.id().cmp(&b.id())));
        for action in freed {
            if action.assigned_resource().is_some() {
                self.launch(&action);
            } else if let Err(e) = self.place_and_launch(&action, None, None) {
                warn!(action = %action.id(), error = %e, "released action could not be placed");
            }
        }
    }

    /// Fail `root` and, transitively, every data successor. Returns the
    /// failed ids in cascade order.
    pub(crate) fn fail_cascade(&self, root: &Arc<AllocatableAction>, cause: &str) -> Vec<ActionId> {
        let mut failed = Vec::new();
        let mut resource_free = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(action) = queue.pop_front() {
            let id = action.id();
            let (resource, predecessors, successors) = {
                let mut s = action.state();
                if s.status.is_terminal() {
                    continue;
                }
                s.status = ActionStatus::Failed;
                (
                    s.resource.clone(),
                    std::mem::take(&mut s.data_predecessors),
                    std::mem::take(&mut s.data_successors),
                )
            };
            for p in predecessors {
                if let Some(pred) = self.actions.find(p) {
                    pred.state().data_successors.retain(|s| *s != id);
                }
            }
            if let Some(worker) = resource.as_deref().and_then(|r| self.worker(r)) {
                resource_free.extend(worker.unschedule_action(&self.actions, id));
            }
            self.blocked
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|b| *b != id);
            self.ordered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(_, queued)| *queued != id);
            warn!(action = %id, %cause, "action failed");
            self.elasticity_failed(&action, cause);
            failed.push(id);
            queue.extend(successors.into_iter().filter_map(|s| self.actions.find(s)));
        }
        self.launch_ids(resource_free);
        failed
    }

    /// Register `core` and map it onto the workers already in the pool.
    /// Actions parked for want of a capable worker are placed again.
    pub fn register_core(&self, core: CoreElement) {
        let id = core.id;
        self.ctx.register_core(core);
        for worker in self.workers() {
            if worker.lifecycle() == WorkerLifecycle::Running {
                self.ctx.update_worker_cores(&worker.description());
            }
        }
        debug!(core = id, workers = self.ctx.workers_for(id).len(), "core registered");
        self.retry_blocked();
    }

    // ── Workers ────────────────────────────────────────────────────

    pub(crate) fn register_worker(
        &self,
        worker: WorkerDescription,
        lifecycle: WorkerLifecycle,
    ) -> SchedulerResult<Arc<ResourceScheduler>> {
        if self.worker(&worker.name).is_some() {
            return Err(SchedulerError::WorkerExists(worker.name));
        }
        let rs = Arc::new(ResourceScheduler::new(
            worker.clone(),
            self.config.policy,
            self.ctx.clone(),
            lifecycle,
        ));
        if let Some(store) = &self.store {
            match store.worker_profiles(&worker.name) {
                Ok(profiles) => rs.load_profiles(profiles),
                Err(e) => warn!(worker = %worker.name, error = %e, "could not load profiles"),
            }
        }
        {
            let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
            if workers.contains_key(&worker.name) {
                return Err(SchedulerError::WorkerExists(worker.name));
            }
            workers.insert(worker.name.clone(), rs.clone());
        }
        if lifecycle == WorkerLifecycle::Running {
            self.ctx.update_worker_cores(&worker);
        }
        Ok(rs)
    }

    /// A worker that is already up joins the pool.
    pub fn worker_joined(&self, worker: WorkerDescription) -> SchedulerResult<()> {
        let rs = self.register_worker(worker, WorkerLifecycle::Running)?;
        info!(worker = %rs.name(), capacity = %rs.capacity(), "worker joined");
        self.retry_blocked();
        Ok(())
    }

    /// A worker vanished. Pending actions move elsewhere; the ids of the
    /// actions that were running on it are returned so the caller can
    /// report them as failed.
    pub fn worker_left(&self, name: &str) -> SchedulerResult<Vec<ActionId>> {
        let worker = self.require_worker(name)?;
        let running = worker.hosted();
        self.remove_worker(&worker);
        info!(worker = %name, running = running.len(), "worker left");
        Ok(running)
    }

    /// Take `worker` out of the pool for good.
    pub(crate) fn remove_worker(&self, worker: &Arc<ResourceScheduler>) {
        let name = worker.name().to_string();
        self.ctx.remove_worker(&name);
        worker.set_lifecycle(WorkerLifecycle::Removed);
        for id in worker.queued() {
            let Some(action) = self.actions.find(id) else {
                continue;
            };
            if action.kind().is_task() {
                self.reschedule(&action);
            } else {
                self.fail_cascade(&action, "worker removed");
            }
        }

        let profiles = worker.retire();
        self.ctx.retire_profiles(&profiles);
        if let Some(store) = &self.store
            && let Err(e) = store.retire_worker(&name)
        {
            warn!(worker = %name, error = %e, "could not retire profiles");
        }
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
        debug!(worker = %name, retired = profiles.len(), "worker removed");
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn status(&self, id: ActionId) -> SchedulerResult<ActionStatus> {
        Ok(self.actions.get(id)?.status())
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn hosted_on(&self, worker: &str) -> SchedulerResult<Vec<ActionId>> {
        Ok(self.require_worker(worker)?.hosted())
    }

    pub fn blocked_on(&self, worker: &str) -> SchedulerResult<Vec<ActionId>> {
        Ok(self.require_worker(worker)?.blocked())
    }

    /// Actions waiting for a compatible worker to appear.
    pub fn blocked_forever(&self) -> Vec<ActionId> {
        self.blocked.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn profiles_snapshot(&self) -> ProfileSnapshot {
        let mut snapshot = ProfileSnapshot::default();
        for worker in self.workers() {
            snapshot.resources.insert(
                worker.name().to_string(),
                ResourceProfiles {
                    implementations: worker.profiles().into_iter().collect(),
                },
            );
        }
        snapshot.retired = self.ctx.retired_profiles().into_iter().collect();
        snapshot
    }

    pub fn pool_load(&self) -> PoolLoad {
        let mut load = PoolLoad {
            unassigned_actions: self.blocked_forever().len(),
            waiting_actions: self.queued_in_order().len(),
            ..Default::default()
        };
        for worker in self.workers() {
            match worker.lifecycle() {
                WorkerLifecycle::Running => {
                    load.workers += 1;
                    load.waiting_actions += worker.blocked().len();
                    if worker.is_idle() {
                        load.idle_workers.push(worker.name().to_string());
                    }
                }
                WorkerLifecycle::Starting => load.pending_starts += 1,
                _ => {}
            }
        }
        load
    }

    /// Forget finished and failed actions.
    pub fn prune(&self) -> usize {
        self.actions.prune_terminal()
    }
}

impl ActionOrchestrator for TaskScheduler {
    fn on_completed(&self, action: ActionId) {
        if let Err(e) = self.action_completed(action) {
            warn!(%action, error = %e, "completion rejected");
        }
    }

    fn on_failed(&self, action: ActionId, cause: String) {
        match self.action_failed(action, cause) {
            Ok(FailureOutcome::Failed(ids)) => warn!(%action, cascade = ids.len(), "action failed permanently"),
            Ok(_) => {}
            Err(e) => warn!(%action, error = %e, "failure rejected"),
        }
    }
}
