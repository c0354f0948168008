//! Pool elasticity expressed as actions.
//!
//! Starting, stopping and shrinking a worker go through the same placement
//! and admission path as tasks. Each elasticity action is pinned to its
//! worker and carries the maximum priority, so it queues ahead of every
//! task waiting there.
//!
//! ```text
//! add_worker     ──▶ StartWorker   (reserves nothing)          ──▶ worker Running
//! stop_worker    ──▶ StopWorker    (everything not held busy)  ──▶ worker removed
//! reduce_worker  ──▶ ReduceWorker  (the reduction)             ──▶ capacity destroyed
//! mark_busy      ──▶ BusyWorker    (the reduction)             ──▶ held until the
//!                                                                  update settles
//! ```
//!
//! With a provisioner configured, the outside-world part of Start, Stop and
//! Reduce runs on the provisioning pool and reports back through the
//! action's notifier. Without one they complete as soon as they launch.

use std::sync::Arc;

use taskgrid_autoscale::{BoxFuture, ResourceUpdate, UpdateKind, drain_and_stop};
use taskgrid_core::{ResourceDescription, WorkerDescription};
use tracing::{debug, error, info, warn};

use crate::action::{ActionId, AllocatableAction};
use crate::error::{SchedulerError, SchedulerResult};
use crate::kind::ActionKind;
use crate::resource::{ResourceScheduler, WorkerLifecycle};
use crate::task_scheduler::TaskScheduler;

impl TaskScheduler {
    /// Bring a new worker into the pool. It accepts tasks once its start
    /// action completes.
    pub fn add_worker(&self, worker: WorkerDescription) -> SchedulerResult<ActionId> {
        let name = worker.name.clone();
        self.register_worker(worker.clone(), WorkerLifecycle::Starting)?;
        let action = self.pinned_action(ActionKind::StartWorker { worker }, &name);
        info!(worker = %name, action = %action.id(), "starting worker");
        self.place_and_launch(&action, None, None)?;
        Ok(action.id())
    }

    /// Drain `name` and remove it. Queued tasks move elsewhere at once;
    /// running ones finish first.
    pub fn stop_worker(&self, name: &str) -> SchedulerResult<ActionId> {
        let worker = self.running_worker(name)?;
        worker.set_lifecycle(WorkerLifecycle::Stopping);
        self.context().remove_worker(name);

        for id in worker.queued() {
            if let Some(action) = self.actions().find(id)
                && action.kind().is_task()
            {
                self.reschedule(&action);
            }
        }

        let capacity = worker.capacity();
        let action = self.pinned_action(ActionKind::StopWorker { capacity }, name);
        info!(worker = %name, action = %action.id(), "stopping worker");
        self.place_and_launch(&action, None, None)?;
        Ok(action.id())
    }

    /// Take `reduction` away from `name` once the worker can spare it. The
    /// returned update completes when the capacity is gone.
    pub fn reduce_worker(&self, name: &str, reduction: ResourceDescription) -> SchedulerResult<Arc<ResourceUpdate>> {
        let worker = self.running_worker(name)?;
        self.check_reduction(&worker, &reduction)?;
        let update = Arc::new(ResourceUpdate::reduce(reduction));
        let action = self.pinned_action(
            ActionKind::ReduceWorker {
                update: update.clone(),
            },
            name,
        );
        info!(worker = %name, action = %action.id(), %reduction, "reducing worker");
        self.place_and_launch(&action, None, None)?;
        Ok(update)
    }

    /// Grow `name` by `increase`. Takes effect immediately.
    pub fn increase_worker(&self, name: &str, increase: ResourceDescription) -> SchedulerResult<()> {
        let worker = self.require_worker(name)?;
        let drained = worker.increase(self.actions(), &increase);
        self.context().update_worker_cores(&worker.description());
        info!(worker = %name, %increase, capacity = %worker.capacity(), "worker increased");
        self.dispatch_drained(drained, &worker);
        self.retry_blocked();
        Ok(())
    }

    /// Hold `update`'s capacity on `name` until
    /// [`complete_resource_update`](Self::complete_resource_update).
    pub fn mark_busy(&self, name: &str, update: Arc<ResourceUpdate>) -> SchedulerResult<ActionId> {
        let worker = self.running_worker(name)?;
        self.check_reduction(&worker, update.modification())?;
        let action = self.pinned_action(ActionKind::BusyWorker { update }, name);
        debug!(worker = %name, action = %action.id(), "holding capacity");
        self.place_and_launch(&action, None, None)?;
        Ok(action.id())
    }

    /// Settle the capacity a busy action holds for `update` on `name`.
    pub fn complete_resource_update(&self, name: &str, update: &ResourceUpdate) -> SchedulerResult<()> {
        let worker = self.require_worker(name)?;
        let drained = worker
            .settle_busy(self.actions(), update.id(), update.kind())
            .ok_or_else(|| SchedulerError::InvalidUpdate {
                worker: name.to_string(),
                reason: format!("nothing held for update {}", update.id()),
            })?;
        update.complete(Ok(()));
        self.context().update_worker_cores(&worker.description());
        info!(worker = %name, update = update.id(), kind = ?update.kind(), capacity = %worker.capacity(), "resource update settled");
        match update.kind() {
            UpdateKind::Reduce => self.evict_unfittable(&worker),
            UpdateKind::Increase => self.retry_blocked(),
        }
        self.dispatch_drained(drained, &worker);
        Ok(())
    }

    fn pinned_action(&self, kind: ActionKind, worker: &str) -> Arc<AllocatableAction> {
        let action = self.create_action(kind);
        action.state().info.set_enforced_target(worker);
        action
    }

    fn running_worker(&self, name: &str) -> SchedulerResult<Arc<ResourceScheduler>> {
        let worker = self.require_worker(name)?;
        match worker.lifecycle() {
            WorkerLifecycle::Running => Ok(worker),
            lifecycle => Err(SchedulerError::InvalidUpdate {
                worker: name.to_string(),
                reason: format!("worker is {lifecycle:?}"),
            }),
        }
    }

    fn check_reduction(&self, worker: &ResourceScheduler, reduction: &ResourceDescription) -> SchedulerResult<()> {
        let invalid = |reason: String| SchedulerError::InvalidUpdate {
            worker: worker.name().to_string(),
            reason,
        };
        if reduction.is_empty() {
            return Err(invalid("empty reduction".into()));
        }
        let capacity = worker.capacity();
        if !capacity.fits(reduction) {
            return Err(invalid(format!("{reduction} exceeds capacity {capacity}")));
        }
        Ok(())
    }

    fn dispatch_drained(&self, drained: Vec<Arc<AllocatableAction>>, worker: &Arc<ResourceScheduler>) {
        for action in &drained {
            self.do_action(action, worker);
        }
    }

    /// Queued tasks that no longer fit the worker at all go elsewhere.
    fn evict_unfittable(&self, worker: &ResourceScheduler) {
        for id in worker.unfittable() {
            if let Some(action) = self.actions().find(id) {
                debug!(action = %id, worker = %worker.name(), "task no longer fits, rescheduling");
                self.reschedule(&action);
            }
        }
    }

    /// Execute the outside-world part of an elasticity action.
    pub(crate) fn run_elasticity(&self, action: &Arc<AllocatableAction>, worker: &Arc<ResourceScheduler>) {
        let notifier = self.notifier(action.id());
        let Some(provisioning) = &self.provisioning else {
            notifier.completed();
            return;
        };
        let provisioner = provisioning.provisioner.clone();
        let name = worker.name().to_string();
        let operation: BoxFuture<()> = match action.kind() {
            ActionKind::StartWorker { worker } => provisioner.start_worker(worker),
            ActionKind::StopWorker { .. } => Box::pin(drain_and_stop(provisioner, name.clone())),
            ActionKind::ReduceWorker { update } => provisioner.reduce_worker(&name, update.modification()),
            ActionKind::BusyWorker { .. } | ActionKind::Task(_) => {
                notifier.completed();
                return;
            }
        };
        let label = action.kind().name();
        provisioning.pool.spawn(label, async move {
            match operation.await {
                Ok(()) => notifier.completed(),
                Err(e) => {
                    error!(worker = %name, operation = label, error = %e, "provisioning failed");
                    notifier.failed(e.to_string());
                }
            }
            Ok(())
        });
    }

    /// Apply the pool-side effect of a finished action.
    pub(crate) fn elasticity_completed(&self, action: &AllocatableAction, worker: Option<&Arc<ResourceScheduler>>) {
        match action.kind() {
            ActionKind::Task(_) => {}
            ActionKind::StartWorker { .. } => {
                let Some(worker) = worker else {
                    return;
                };
                if worker.lifecycle() != WorkerLifecycle::Starting {
                    return;
                }
                worker.set_lifecycle(WorkerLifecycle::Running);
                self.context().update_worker_cores(&worker.description());
                info!(worker = %worker.name(), capacity = %worker.capacity(), "worker started");
                self.retry_blocked();
            }
            ActionKind::StopWorker { .. } => {
                if let Some(worker) = worker {
                    self.remove_worker(worker);
                    info!(worker = %worker.name(), "worker stopped");
                }
            }
            ActionKind::ReduceWorker { update } => {
                update.complete(Ok(()));
                let Some(worker) = worker else {
                    return;
                };
                info!(worker = %worker.name(), capacity = %worker.capacity(), "worker reduced");
                if worker.capacity().is_empty() {
                    if let Err(e) = self.stop_worker(worker.name()) {
                        warn!(worker = %worker.name(), error = %e, "could not stop emptied worker");
                    }
                } else {
                    self.context().update_worker_cores(&worker.description());
                    self.evict_unfittable(worker);
                }
            }
            ActionKind::BusyWorker { update } => {
                debug!(action = %action.id(), update = update.id(), "capacity held");
            }
        }
    }

    /// Undo or report the pool-side effect of a failed action.
    pub(crate) fn elasticity_failed(&self, action: &AllocatableAction, cause: &str) {
        match action.kind() {
            ActionKind::Task(_) => {}
            ActionKind::StartWorker { .. } | ActionKind::StopWorker { .. } => {
                let Some(worker) = action.enforced_target().and_then(|w| self.worker(&w)) else {
                    return;
                };
                if worker.lifecycle() != WorkerLifecycle::Removed {
                    warn!(worker = %worker.name(), kind = action.kind().name(), %cause, "dropping worker");
                    self.remove_worker(&worker);
                }
            }
            ActionKind::ReduceWorker { update } | ActionKind::BusyWorker { update } => {
                update.complete(Err(cause.to_string()));
            }
        }
    }
}
