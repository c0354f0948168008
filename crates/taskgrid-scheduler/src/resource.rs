//! Per-worker resource scheduler.
//!
//! A `ResourceScheduler` owns everything the pool knows about one worker:
//!
//! - the worker's total capacity and the part of it that is free now
//! - the actions it hosts (running) with the capacity each one reserved
//! - the FIFO queue of actions that were launched but did not fit
//! - the gap timeline used to estimate start and end times
//! - execution profiles per implementation signature
//!
//! # Capacity
//!
//! ```text
//! description = free + Σ hosted reservations + Σ busy holds
//! ```
//!
//! An action is admitted only when nothing older is queued and its
//! requirement fits in `free`; otherwise it waits. When capacity comes back
//! the queue drains strictly in order: the head is admitted while it fits,
//! and the first head that does not fit stops the drain. Elasticity actions
//! queue ahead of every task but behind earlier elasticity actions.
//!
//! # Resource graph
//!
//! Every scheduled action contributes a gap at its expected end. Under the
//! full-graph policy, the pending origins of the gaps an action consumes
//! become its resource predecessors and gate its launch.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskgrid_autoscale::UpdateKind;
use taskgrid_core::config::SchedulingPolicy;
use taskgrid_core::{DataParam, Implementation, ResourceDescription, WorkerDescription};
use taskgrid_placement::{DEFAULT_EXECUTION_TIME, Profile, RunProfile, Score, locality_score};
use tracing::debug;

use crate::action::{ActionId, ActionStatus, ActionTable, AllocatableAction};
use crate::context::SchedulingContext;
use crate::error::{SchedulerError, SchedulerResult};
use crate::gap::{Gap, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    /// A start action is bringing the worker up.
    Starting,
    Running,
    /// A stop action is pending; only stop actions may launch.
    Stopping,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Running,
    Waiting,
}

/// Fate of an action's reservation when it leaves the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Back to the free pool.
    Free,
    /// Gone from the worker's capacity.
    Destroy,
    /// Kept aside until the resource update with this id settles.
    Hold(u64),
}

#[derive(Debug, Clone, Copy)]
struct Queued {
    id: ActionId,
    requirement: ResourceDescription,
    elastic: bool,
    /// Needs whatever the worker still owns, measured when it is admitted.
    stops: bool,
}

struct ResourceState {
    description: ResourceDescription,
    free: ResourceDescription,
    hosted: BTreeMap<ActionId, ResourceDescription>,
    busy: HashMap<u64, ResourceDescription>,
    blocked: VecDeque<Queued>,
    scheduled: BTreeSet<ActionId>,
    timeline: Timeline,
    profiles: HashMap<String, Profile>,
    lifecycle: WorkerLifecycle,
}

impl ResourceState {
    fn expected_duration(&self, ctx: &SchedulingContext, signature: &str) -> u64 {
        if let Some(profile) = self.profiles.get(signature)
            && profile.executions() > 0
        {
            return profile.average_time();
        }
        ctx.retired_profile(signature)
            .filter(|p| p.executions() > 0)
            .map(|p| p.average_time())
            .unwrap_or(DEFAULT_EXECUTION_TIME)
    }

    /// Everything the worker owns except busy holds.
    fn stop_requirement(&self) -> ResourceDescription {
        let mut requirement = self.description;
        for held in self.busy.values() {
            requirement.reduce(held);
        }
        requirement
    }

    fn host(&mut self, action: &AllocatableAction, reservation: ResourceDescription, now: i64) {
        self.hosted.insert(action.id(), reservation);
        let mut s = action.state();
        s.status = ActionStatus::Running;
        s.started_at = now;
        s.run = Some(RunProfile::start());
    }

    fn forget(&mut self, id: ActionId) {
        self.scheduled.remove(&id);
        self.blocked.retain(|q| q.id != id);
    }

    fn drain(&mut self, table: &ActionTable, now: i64) -> Vec<Arc<AllocatableAction>> {
        let mut drained = Vec::new();
        if self.lifecycle == WorkerLifecycle::Removed {
            return drained;
        }
        while let Some(head) = self.blocked.front().copied() {
            let requirement = if head.stops {
                self.stop_requirement()
            } else {
                head.requirement
            };
            if !self.free.fits(&requirement) {
                break;
            }
            self.blocked.pop_front();
            let Some(action) = table.find(head.id) else {
                continue;
            };
            if action.status() != ActionStatus::Waiting {
                continue;
            }
            self.free.reduce(&requirement);
            self.host(&action, requirement, now);
            drained.push(action);
        }
        drained
    }

    /// Rebuild the timeline from what the worker hosts and queues now.
    /// Resource edges are left alone.
    fn rebuild(&mut self, table: &ActionTable, ctx: &SchedulingContext, now: i64) {
        let mut timeline = Timeline::new(now, self.free);

        for (id, reserved) in &self.hosted {
            let Some(action) = table.find(*id) else {
                continue;
            };
            let (started, signature) = {
                let s = action.state();
                (s.started_at, s.implementation.as_ref().map(|i| i.signature.clone()))
            };
            let duration = signature
                .map(|sig| self.expected_duration(ctx, &sig))
                .unwrap_or_default() as i64;
            let end = (started + duration).max(now);
            timeline.insert(Gap {
                start: end,
                origin: Some(*id),
                available: *reserved,
            });
            action.state().info.set_expectations(started, end);
        }

        let waiting: Vec<ActionId> = self.blocked.iter().map(|q| q.id).collect();
        let mut rest: Vec<Arc<AllocatableAction>> = self
            .scheduled
            .iter()
            .filter(|id| !self.hosted.contains_key(*id) && !waiting.contains(*id))
            .filter_map(|id| table.find(*id))
            .collect();
        rest.sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.id().cmp(&b.id())));

        for action in waiting.iter().filter_map(|id| table.find(*id)).chain(rest) {
            let Some(implementation) = action.assigned_implementation() else {
                continue;
            };
            let ready_at = data_ready_at(table, &action, now);
            let duration = self.expected_duration(ctx, &implementation.signature) as i64;
            let start = timeline
                .allocate(&implementation.requirements, ready_at, |_| false)
                .map(|p| p.start)
                .unwrap_or_else(|| ready_at.max(timeline.latest_start()));
            timeline.insert(Gap {
                start: start + duration,
                origin: Some(action.id()),
                available: implementation.requirements,
            });
            action.state().info.set_expectations(start, start + duration);
        }

        self.timeline = timeline;
    }
}

/// Detach `id` from the resource graph, linking its live predecessors
/// straight to its successors. Returns the successors left executable.
fn repair_graph(table: &ActionTable, id: ActionId) -> Vec<ActionId> {
    let Some(action) = table.find(id) else {
        return Vec::new();
    };
    let (predecessors, successors) = {
        let mut s = action.state();
        (s.info.take_resource_predecessors(), s.info.take_resource_successors())
    };

    let mut live = Vec::new();
    for p in &predecessors {
        let Some(pred) = table.find(*p) else {
            continue;
        };
        let mut s = pred.state();
        s.info.remove_resource_successor(id);
        if !s.status.is_terminal() {
            for succ in &successors {
                s.info.add_resource_successor(*succ);
            }
            live.push(*p);
        }
    }

    let mut freed = Vec::new();
    for succ in successors {
        let Some(successor) = table.find(succ) else {
            continue;
        };
        let mut s = successor.state();
        s.info.remove_resource_predecessor(id);
        for p in &live {
            s.info.add_resource_predecessor(*p);
        }
        if s.info.is_executable() && !s.status.is_terminal() {
            freed.push(succ);
        }
    }
    freed
}

/// Every action that waits on `id`, directly or not, through data or
/// resource edges. None of them may become a resource predecessor of `id`.
fn dependents(table: &ActionTable, id: ActionId) -> HashSet<ActionId> {
    let mut seen = HashSet::new();
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
        let Some(action) = table.find(next) else {
            continue;
        };
        let edges: Vec<ActionId> = {
            let s = action.state();
            s.data_successors
                .iter()
                .chain(s.info.resource_successors())
                .copied()
                .collect()
        };
        for succ in edges {
            if succ != id && seen.insert(succ) {
                stack.push(succ);
            }
        }
    }
    seen
}

/// Earliest instant every data predecessor of `action` is expected done.
pub(crate) fn data_ready_at(table: &ActionTable, action: &AllocatableAction, now: i64) -> i64 {
    action
        .data_predecessors()
        .into_iter()
        .filter_map(|p| table.find(p))
        .map(|p| p.expectations().1)
        .fold(now, i64::max)
}

pub struct ResourceScheduler {
    name: String,
    policy: SchedulingPolicy,
    ctx: Arc<SchedulingContext>,
    inner: Mutex<ResourceState>,
}

impl ResourceScheduler {
    pub fn new(
        worker: WorkerDescription,
        policy: SchedulingPolicy,
        ctx: Arc<SchedulingContext>,
        lifecycle: WorkerLifecycle,
    ) -> Self {
        let now = ctx.now_ms();
        Self {
            name: worker.name,
            policy,
            ctx,
            inner: Mutex::new(ResourceState {
                description: worker.capacity,
                free: worker.capacity,
                hosted: BTreeMap::new(),
                busy: HashMap::new(),
                blocked: VecDeque::new(),
                scheduled: BTreeSet::new(),
                timeline: Timeline::new(now, worker.capacity),
                profiles: HashMap::new(),
                lifecycle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> WorkerDescription {
        WorkerDescription::new(self.name.clone(), self.lock().description)
    }

    pub fn capacity(&self) -> ResourceDescription {
        self.lock().description
    }

    pub fn free_capacity(&self) -> ResourceDescription {
        self.lock().free
    }

    /// Capacity held by hosted actions and busy reservations.
    pub fn reserved(&self) -> ResourceDescription {
        let st = self.lock();
        let mut total = ResourceDescription::default();
        for r in st.hosted.values().chain(st.busy.values()) {
            total.increase(r);
        }
        total
    }

    pub fn lifecycle(&self) -> WorkerLifecycle {
        self.lock().lifecycle
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: WorkerLifecycle) {
        self.lock().lifecycle = lifecycle;
    }

    pub fn hosted(&self) -> Vec<ActionId> {
        self.lock().hosted.keys().copied().collect()
    }

    /// Waiting actions, head of the queue first.
    pub fn blocked(&self) -> Vec<ActionId> {
        self.lock().blocked.iter().map(|q| q.id).collect()
    }

    pub fn scheduled(&self) -> Vec<ActionId> {
        self.lock().scheduled.iter().copied().collect()
    }

    /// Scheduled or waiting actions that are not running.
    pub fn queued(&self) -> Vec<ActionId> {
        let st = self.lock();
        let mut ids: BTreeSet<ActionId> = st.scheduled.iter().copied().collect();
        ids.extend(st.blocked.iter().map(|q| q.id));
        ids.retain(|id| !st.hosted.contains_key(id));
        ids.into_iter().collect()
    }

    pub fn is_idle(&self) -> bool {
        let st = self.lock();
        st.hosted.is_empty() && st.blocked.is_empty() && st.scheduled.is_empty()
    }

    /// Start of the last gap: when the worker is expected to run dry.
    pub fn indicator(&self) -> i64 {
        self.lock().timeline.latest_start()
    }

    pub fn gaps(&self) -> Vec<Gap> {
        self.lock().timeline.gaps().to_vec()
    }

    /// The worker could run `implementation` if it were idle.
    pub fn can_host(&self, implementation: &Implementation) -> bool {
        self.lock().description.fits(&implementation.requirements)
    }

    /// `requirement` would be admitted right away.
    pub fn has_room(&self, requirement: &ResourceDescription) -> bool {
        let st = self.lock();
        st.lifecycle == WorkerLifecycle::Running && st.blocked.is_empty() && st.free.fits(requirement)
    }

    // ── Profiles ───────────────────────────────────────────────────

    pub fn profile(&self, signature: &str) -> Option<Profile> {
        self.lock().profiles.get(signature).copied()
    }

    pub fn profiles(&self) -> HashMap<String, Profile> {
        self.lock().profiles.clone()
    }

    pub fn load_profiles(&self, profiles: impl IntoIterator<Item = (String, Profile)>) {
        let mut st = self.lock();
        for (signature, profile) in profiles {
            st.profiles.entry(signature).or_default().accumulate(&profile);
        }
    }

    /// Record one finished execution of `signature`; returns the new profile.
    pub fn profiled_execution(&self, signature: &str, elapsed_ms: u64) -> Profile {
        let mut st = self.lock();
        let profile = st.profiles.entry(signature.to_string()).or_default();
        profile.record(elapsed_ms);
        *profile
    }

    /// Average execution time (ms) expected for `implementation` here.
    pub fn expected_duration(&self, implementation: &Implementation) -> u64 {
        self.lock().expected_duration(&self.ctx, &implementation.signature)
    }

    /// Cheapest implementation this worker can host; ties keep the first.
    pub fn best_implementation(&self, candidates: &[Implementation]) -> Option<Implementation> {
        let st = self.lock();
        candidates
            .iter()
            .filter(|i| st.description.fits(&i.requirements))
            .min_by_key(|i| st.expected_duration(&self.ctx, &i.signature))
            .cloned()
    }

    /// Layer this worker's terms on top of an action score.
    pub fn score(&self, base: Score, params: &[DataParam], implementation: &Implementation) -> Score {
        let locality = self.ctx.with_shared_disks(|d| locality_score(params, &self.name, d));
        let st = self.lock();
        let score = base
            .with_resource(locality, -(st.blocked.len() as i64))
            .with_cost(st.expected_duration(&self.ctx, &implementation.signature));
        if st.lifecycle == WorkerLifecycle::Running && st.free.fits(&implementation.requirements) {
            score
        } else {
            score.penalized()
        }
    }

    // ── Launching ──────────────────────────────────────────────────

    /// Run `action` now or queue it. The caller holds the action's launch
    /// lock.
    pub(crate) fn admit(&self, action: &AllocatableAction, now: i64) -> SchedulerResult<Admission> {
        let kind = action.kind();
        let mut st = self.lock();
        let refused = match st.lifecycle {
            WorkerLifecycle::Removed => true,
            WorkerLifecycle::Stopping => !kind.stops_resource(),
            _ => false,
        };
        if refused {
            return Err(SchedulerError::SchedulingConflict {
                action: action.id(),
                reason: format!("worker {} is {:?}", self.name, st.lifecycle),
            });
        }

        if !kind.reserves_resources() {
            st.host(action, ResourceDescription::default(), now);
            return Ok(Admission::Running);
        }

        let stops = kind.stops_resource();
        let requirement = if stops {
            st.stop_requirement()
        } else {
            action
                .assigned_implementation()
                .map(|i| i.requirements)
                .unwrap_or_default()
        };
        let elastic = kind.is_elasticity();
        let behind_others = if elastic {
            st.blocked.iter().any(|q| q.elastic)
        } else {
            !st.blocked.is_empty()
        };

        if behind_others || !st.free.fits(&requirement) {
            let entry = Queued {
                id: action.id(),
                requirement,
                elastic,
                stops,
            };
            if elastic {
                let at = st.blocked.iter().take_while(|q| q.elastic).count();
                st.blocked.insert(at, entry);
            } else {
                st.blocked.push_back(entry);
            }
            action.state().status = ActionStatus::Waiting;
            debug!(action = %action.id(), worker = %self.name, queued = st.blocked.len(), "action waiting for capacity");
            return Ok(Admission::Waiting);
        }

        st.free.reduce(&requirement);
        st.host(action, requirement, now);
        Ok(Admission::Running)
    }

    /// Stop hosting `id`, settle its reservation and drain the queue.
    /// Returns the actions the drain moved to running.
    pub(crate) fn finish(&self, table: &ActionTable, id: ActionId, release: Release) -> Vec<Arc<AllocatableAction>> {
        let now = self.ctx.now_ms();
        let mut st = self.lock();
        st.forget(id);
        if let Some(reserved) = st.hosted.remove(&id) {
            match release {
                Release::Free => st.free.increase(&reserved),
                Release::Destroy => st.description.reduce(&reserved),
                Release::Hold(update) => st.busy.entry(update).or_default().increase(&reserved),
            }
            if release != Release::Free {
                st.rebuild(table, &self.ctx, now);
            }
        }
        st.drain(table, now)
    }

    pub(crate) fn drain(&self, table: &ActionTable) -> Vec<Arc<AllocatableAction>> {
        let now = self.ctx.now_ms();
        self.lock().drain(table, now)
    }

    // ── Timeline ───────────────────────────────────────────────────

    /// Place `action` on the gap timeline. Returns the expected (start, end).
    pub(crate) fn schedule_action(&self, table: &ActionTable, action: &AllocatableAction, ready_at: i64) -> (i64, i64) {
        let id = action.id();
        let Some(implementation) = action.assigned_implementation() else {
            return (ready_at, ready_at);
        };
        let gated = self.policy.gates_on_gaps();
        let downstream = if gated { dependents(table, id) } else { HashSet::new() };
        let mut guard = self.lock();
        let duration = guard.expected_duration(&self.ctx, &implementation.signature) as i64;
        let st = &mut *guard;
        let (scheduled, hosted) = (&st.scheduled, &st.hosted);
        let placed = st.timeline.allocate(&implementation.requirements, ready_at, |origin| {
            origin != id
                && !downstream.contains(&origin)
                && (scheduled.contains(&origin) || hosted.contains_key(&origin))
        });
        let (start, predecessors) = match placed {
            Some(p) => (p.start, p.predecessors),
            None => (ready_at.max(st.timeline.latest_start()), Vec::new()),
        };
        let end = start + duration;
        st.timeline.insert(Gap {
            start: end,
            origin: Some(id),
            available: implementation.requirements,
        });
        st.scheduled.insert(id);

        {
            let mut s = action.state();
            s.info.set_expectations(start, end);
            if gated {
                for p in &predecessors {
                    s.info.add_resource_predecessor(*p);
                }
            }
        }
        if gated {
            for p in &predecessors {
                if let Some(pred) = table.find(*p) {
                    pred.state().info.add_resource_successor(id);
                }
            }
        }
        drop(guard);

        debug!(action = %id, worker = %self.name, start, end, "action scheduled");
        (start, end)
    }

    /// Remove `id` from this worker's queue and resource graph. Returns the
    /// successors that no longer have a resource predecessor.
    pub fn unschedule_action(&self, table: &ActionTable, id: ActionId) -> Vec<ActionId> {
        let mut st = self.lock();
        st.forget(id);
        repair_graph(table, id)
    }

    /// Take back an action that is not running yet. Returns `None` when it
    /// is already hosted or no longer pending.
    pub(crate) fn withdraw(&self, table: &ActionTable, action: &AllocatableAction) -> Option<Vec<ActionId>> {
        self.take_back(table, action, false)
    }

    /// Like [`withdraw`](Self::withdraw), but only for an action this
    /// worker still has scheduled or queued.
    pub(crate) fn withdraw_queued(&self, table: &ActionTable, action: &AllocatableAction) -> Option<Vec<ActionId>> {
        self.take_back(table, action, true)
    }

    fn take_back(&self, table: &ActionTable, action: &AllocatableAction, queued_only: bool) -> Option<Vec<ActionId>> {
        let id = action.id();
        let mut st = self.lock();
        if st.hosted.contains_key(&id) {
            return None;
        }
        if queued_only && !st.scheduled.contains(&id) && !st.blocked.iter().any(|q| q.id == id) {
            return None;
        }
        {
            let mut s = action.state();
            if !matches!(s.status, ActionStatus::Runnable | ActionStatus::Waiting) {
                return None;
            }
            s.status = ActionStatus::Runnable;
        }
        st.forget(id);
        Some(repair_graph(table, id))
    }

    /// Recompute the timeline from what is hosted and queued right now.
    pub fn rebuild_timeline(&self, table: &ActionTable) {
        let now = self.ctx.now_ms();
        self.lock().rebuild(table, &self.ctx, now);
    }

    /// When `implementation` could start here if placed now.
    pub fn projected_start(&self, implementation: &Implementation, ready_at: i64) -> i64 {
        let st = self.lock();
        let mut timeline = st.timeline.clone();
        timeline
            .allocate(&implementation.requirements, ready_at, |_| false)
            .map(|p| p.start)
            .unwrap_or_else(|| ready_at.max(st.timeline.latest_start()))
    }

    // ── Capacity updates ───────────────────────────────────────────

    pub(crate) fn increase(&self, table: &ActionTable, modification: &ResourceDescription) -> Vec<Arc<AllocatableAction>> {
        let now = self.ctx.now_ms();
        let mut st = self.lock();
        st.description.increase(modification);
        st.free.increase(modification);
        st.rebuild(table, &self.ctx, now);
        st.drain(table, now)
    }

    /// Settle the capacity a busy action held for `update`. Reductions
    /// destroy it, increases give it back. `None` when nothing is held.
    pub(crate) fn settle_busy(
        &self,
        table: &ActionTable,
        update: u64,
        kind: UpdateKind,
    ) -> Option<Vec<Arc<AllocatableAction>>> {
        let now = self.ctx.now_ms();
        let mut st = self.lock();
        let held = st.busy.remove(&update)?;
        match kind {
            UpdateKind::Reduce => st.description.reduce(&held),
            UpdateKind::Increase => st.free.increase(&held),
        }
        st.rebuild(table, &self.ctx, now);
        Some(st.drain(table, now))
    }

    /// Queued tasks whose requirement no longer fits the whole worker.
    pub(crate) fn unfittable(&self) -> Vec<ActionId> {
        let st = self.lock();
        st.blocked
            .iter()
            .filter(|q| !q.elastic && !st.description.fits(&q.requirement))
            .map(|q| q.id)
            .collect()
    }

    /// Mark the worker removed and hand back its profiles.
    pub(crate) fn retire(&self) -> HashMap<String, Profile> {
        let now = self.ctx.now_ms();
        let mut st = self.lock();
        st.lifecycle = WorkerLifecycle::Removed;
        st.timeline = Timeline::new(now, ResourceDescription::default());
        std::mem::take(&mut st.profiles)
    }
}
