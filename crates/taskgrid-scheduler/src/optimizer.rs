//! Schedule optimizer: moves queued work off the most loaded worker.
//!
//! Each pass rebuilds every running worker's timeline and ranks the
//! workers by the instant they are expected to run dry. The worker that
//! finishes last donates one of its pending tasks to the first worker that
//! would finish that task strictly earlier.
//!
//! ```text
//! rebuild timelines ─▶ rank by expected drain (desc)
//!        ▲                    │
//!        │            donor = last to drain
//!        │            receivers = the rest, earliest first
//!        │                    │
//!        └── moved ◀── first (task, receiver) with an earlier end
//! ```
//!
//! A pass never moves running actions, pinned actions, or actions tied to
//! another action's worker. The number of moves per call is bounded by the
//! number of movable actions seen at the start of the call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::action::{ActionStatus, AllocatableAction};
use crate::kind::ActionKind;
use crate::resource::{ResourceScheduler, WorkerLifecycle, data_ready_at};
use crate::task_scheduler::TaskScheduler;

pub struct ScheduleOptimizer {
    scheduler: Arc<TaskScheduler>,
    interval: Duration,
    initial_delay: Duration,
}

impl ScheduleOptimizer {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        let config = scheduler.config();
        let interval = Duration::from_millis(config.optimizer_interval_ms);
        let initial_delay = Duration::from_millis(config.optimizer_initial_delay_ms);
        Self {
            scheduler,
            interval,
            initial_delay,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn running_workers(&self) -> Vec<Arc<ResourceScheduler>> {
        self.scheduler
            .workers()
            .into_iter()
            .filter(|w| w.lifecycle() == WorkerLifecycle::Running)
            .collect()
    }

    /// Pending tasks on `worker` that may move, latest expected end first.
    fn movable(&self, worker: &ResourceScheduler) -> Vec<Arc<AllocatableAction>> {
        let actions = self.scheduler.actions();
        let mut movable: Vec<_> = worker
            .queued()
            .into_iter()
            .filter_map(|id| actions.find(id))
            .filter(|a| {
                let s = a.state();
                matches!(a.kind(), ActionKind::Task(_))
                    && matches!(s.status, ActionStatus::Runnable | ActionStatus::Waiting)
                    && s.info.enforced_target().is_none()
                    && s.info.constraining_predecessors().is_empty()
            })
            .collect();
        movable.sort_by(|a, b| {
            b.expectations()
                .1
                .cmp(&a.expectations().1)
                .then(a.id().cmp(&b.id()))
        });
        movable
    }

    /// Run optimization passes until nothing improves. Returns how many
    /// actions moved.
    pub fn optimize_once(&self) -> usize {
        let workers = self.running_workers();
        if workers.len() < 2 {
            return 0;
        }
        let limit: usize = workers.iter().map(|w| self.movable(w).len()).sum();

        let mut moved = 0;
        while moved < limit {
            let mut workers = self.running_workers();
            if workers.len() < 2 {
                break;
            }
            for worker in &workers {
                worker.rebuild_timeline(self.scheduler.actions());
            }
            let mut ranked: Vec<(i64, Arc<ResourceScheduler>)> =
                workers.drain(..).map(|w| (w.indicator(), w)).collect();
            ranked.sort_by(|(ia, a), (ib, b)| ib.cmp(ia).then_with(|| a.name().cmp(b.name())));

            let (_, donor) = &ranked[0];
            let receivers: Vec<&Arc<ResourceScheduler>> = ranked[1..].iter().rev().map(|(_, w)| w).collect();
            if !self.donate_one(donor, &receivers) {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            debug!(moved, "optimization pass finished");
        }
        moved
    }

    fn donate_one(&self, donor: &Arc<ResourceScheduler>, receivers: &[&Arc<ResourceScheduler>]) -> bool {
        let ctx = self.scheduler.context();
        let now = ctx.now_ms();
        for action in self.movable(donor) {
            let ActionKind::Task(task) = action.kind() else {
                continue;
            };
            let implementations = ctx.implementations(task.core_id);
            let current_end = action.expectations().1;
            let ready_at = data_ready_at(self.scheduler.actions(), &action, now);
            for receiver in receivers {
                let Some(implementation) = receiver.best_implementation(&implementations) else {
                    continue;
                };
                let end = receiver.projected_start(&implementation, ready_at)
                    + receiver.expected_duration(&implementation) as i64;
                if end >= current_end {
                    continue;
                }
                if self.scheduler.donate(&action, donor, receiver, implementation) {
                    info!(
                        action = %action.id(),
                        from = %donor.name(),
                        to = %receiver.name(),
                        current_end,
                        new_end = end,
                        "action moved"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Optimize periodically until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "schedule optimizer started");
        tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => {}
            _ = shutdown.changed() => return,
        }
        loop {
            self.optimize_once();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("schedule optimizer shutting down");
                    break;
                }
            }
        }
    }
}
