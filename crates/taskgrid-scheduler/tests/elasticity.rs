//! Elasticity integration tests.
//!
//! Start, stop, reduce and busy actions, both completing inline (no
//! provisioner) and through a scripted provisioner on a tokio runtime.
//! Also covers profile persistence across worker departures.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use taskgrid_autoscale::{BoxFuture, Provisioner, ProvisioningPool, ResourceUpdate};
use taskgrid_core::config::SchedulingPolicy;
use taskgrid_core::{ResourceDescription, WorkerDescription};
use taskgrid_scheduler::*;
use taskgrid_state::StateStore;

#[derive(Default)]
struct ScriptedProvisioner {
    events: Mutex<Vec<String>>,
    fail_start: bool,
}

impl ScriptedProvisioner {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Provisioner for ScriptedProvisioner {
    fn start_worker(&self, worker: &WorkerDescription) -> BoxFuture<()> {
        self.events.lock().unwrap().push(format!("start {}", worker.name));
        let fail = self.fail_start;
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if fail {
                anyhow::bail!("quota exceeded");
            }
            Ok(())
        })
    }

    fn stop_worker(&self, worker: &str) -> BoxFuture<()> {
        self.events.lock().unwrap().push(format!("stop {worker}"));
        Box::pin(async { Ok(()) })
    }

    fn reduce_worker(&self, worker: &str, reduction: &ResourceDescription) -> BoxFuture<()> {
        self.events.lock().unwrap().push(format!("reduce {worker} {}", reduction.cpus));
        Box::pin(async { Ok(()) })
    }
}

fn provisioned(provisioner: Arc<ScriptedProvisioner>) -> (Arc<TaskScheduler>, Arc<RecordingDispatcher>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = TaskScheduler::builder(dispatcher.clone())
        .with_provisioner(provisioner, ProvisioningPool::current(2))
        .build()
        .unwrap();
    s.register_core(core(0, &[1]));
    (s, dispatcher)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ── Stop ───────────────────────────────────────────────────────────

#[test]
fn stop_waits_for_running_tasks() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);
    let t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t2 = s.submit_task(TaskPayload::new(0)).unwrap();

    let stop = s.stop_worker("w1").unwrap();
    assert_eq!(status(&s, stop), ActionStatus::Waiting);
    assert_eq!(s.worker("w1").unwrap().lifecycle(), WorkerLifecycle::Stopping);

    // New work no longer lands on a stopping worker.
    let t3 = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(s.blocked_forever(), vec![t3]);

    s.action_completed(t1).unwrap();
    assert_eq!(s.worker_names(), vec!["w1".to_string()]);
    assert_eq!(status(&s, stop), ActionStatus::Waiting);

    s.action_completed(t2).unwrap();
    assert!(s.worker_names().is_empty());
    assert_eq!(status(&s, stop), ActionStatus::Finished);
}

#[test]
fn stop_proceeds_when_last_task_fails() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    let t = s.submit_task(TaskPayload::new(0)).unwrap();
    let stop = s.stop_worker("w1").unwrap();

    assert_eq!(s.action_failed(t, "oom").unwrap(), FailureOutcome::Retried);
    assert_eq!(status(&s, stop), ActionStatus::Finished);
    assert!(s.worker_names().is_empty());
    assert_eq!(s.blocked_forever(), vec![t]);
}

#[test]
fn stop_moves_queued_tasks_elsewhere() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    join(&s, "w2", 1);
    let t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let _t2 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t3 = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(resource_of(&s, t1).as_deref(), Some("w1"));
    assert_eq!(resource_of(&s, t3).as_deref(), Some("w1"));

    s.stop_worker("w1").unwrap();
    assert_eq!(resource_of(&s, t3).as_deref(), Some("w2"));
    assert_eq!(s.blocked_on("w2").unwrap(), vec![t3]);
    assert!(s.blocked_on("w1").unwrap().iter().all(|id| *id != t3));
}

#[test]
fn stop_requires_a_running_worker() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    let _t = s.submit_task(TaskPayload::new(0)).unwrap();
    s.stop_worker("w1").unwrap();
    assert!(matches!(s.stop_worker("w1"), Err(SchedulerError::InvalidUpdate { .. })));
    assert!(matches!(s.stop_worker("nope"), Err(SchedulerError::WorkerNotFound(_))));
}

#[tokio::test]
async fn stop_goes_through_the_provisioner_after_tasks_drain() {
    let provisioner = Arc::new(ScriptedProvisioner::default());
    let (s, _d) = provisioned(provisioner.clone());
    join(&s, "w1", 2);
    let t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t2 = s.submit_task(TaskPayload::new(0)).unwrap();
    let stop = s.stop_worker("w1").unwrap();

    s.action_completed(t1).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(provisioner.events().is_empty());
    assert_eq!(s.worker_names(), vec!["w1".to_string()]);

    s.action_completed(t2).unwrap();
    eventually(|| s.worker_names().is_empty()).await;
    assert_eq!(provisioner.events(), vec!["stop w1".to_string()]);
    assert_eq!(status(&s, stop), ActionStatus::Finished);
}

// ── Start ──────────────────────────────────────────────────────────

#[test]
fn added_worker_picks_up_blocked_work() {
    let (s, _d) = scheduler(SchedulingPolicy::Ready);
    s.register_core(core(0, &[8]));
    let t = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(s.blocked_forever(), vec![t]);

    let start = s.add_worker(WorkerDescription::new("w9", cpus(8))).unwrap();
    assert_eq!(status(&s, start), ActionStatus::Finished);
    assert_eq!(s.worker("w9").unwrap().lifecycle(), WorkerLifecycle::Running);
    assert_eq!(resource_of(&s, t).as_deref(), Some("w9"));
    assert_eq!(status(&s, t), ActionStatus::Running);
}

#[tokio::test]
async fn provisioned_start_brings_worker_up() {
    let provisioner = Arc::new(ScriptedProvisioner::default());
    let (s, _d) = provisioned(provisioner.clone());
    let t = s.submit_task(TaskPayload::new(0)).unwrap();

    s.add_worker(WorkerDescription::new("w1", cpus(2))).unwrap();
    let w1 = s.worker("w1").unwrap();
    assert_eq!(w1.lifecycle(), WorkerLifecycle::Starting);
    assert_eq!(s.pool_load().pending_starts, 1);

    eventually(|| w1.lifecycle() == WorkerLifecycle::Running).await;
    assert_eq!(provisioner.events(), vec!["start w1".to_string()]);
    assert_eq!(status(&s, t), ActionStatus::Running);
}

#[tokio::test]
async fn failed_start_drops_the_worker() {
    let provisioner = Arc::new(ScriptedProvisioner {
        fail_start: true,
        ..Default::default()
    });
    let (s, _d) = provisioned(provisioner);

    let start = s.add_worker(WorkerDescription::new("w1", cpus(2))).unwrap();
    eventually(|| s.worker_names().is_empty()).await;
    assert_eq!(status(&s, start), ActionStatus::Failed);
}

// ── Reduce and busy ────────────────────────────────────────────────

#[test]
fn reduction_waits_for_capacity_and_queues_ahead_of_tasks() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 4);
    let t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t2 = s.submit_task(TaskPayload::new(0)).unwrap();

    let update = s.reduce_worker("w1", cpus(3)).unwrap();
    let t3 = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(status(&s, t3), ActionStatus::Waiting);
    assert!(!update.is_done());

    s.action_completed(t1).unwrap();
    assert_eq!(update.wait(), Ok(()));
    let w1 = s.worker("w1").unwrap();
    assert_eq!(w1.capacity(), cpus(1));
    assert_eq!(status(&s, t3), ActionStatus::Waiting);

    s.action_completed(t2).unwrap();
    assert_eq!(status(&s, t3), ActionStatus::Running);
}

#[test]
fn reducing_to_nothing_stops_the_worker() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);
    let update = s.reduce_worker("w1", cpus(2)).unwrap();
    assert_eq!(update.wait_timeout(Duration::from_secs(1)), Some(Ok(())));
    assert!(s.worker_names().is_empty());
}

#[test]
fn invalid_reductions_are_rejected() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);
    assert!(matches!(
        s.reduce_worker("w1", ResourceDescription::default()),
        Err(SchedulerError::InvalidUpdate { .. })
    ));
    assert!(matches!(
        s.reduce_worker("w1", cpus(3)),
        Err(SchedulerError::InvalidUpdate { .. })
    ));
}

#[tokio::test]
async fn provisioned_reduction_calls_the_provisioner() {
    let provisioner = Arc::new(ScriptedProvisioner::default());
    let (s, _d) = provisioned(provisioner.clone());
    join(&s, "w1", 4);

    let update = s.reduce_worker("w1", cpus(1)).unwrap();
    let w1 = s.worker("w1").unwrap();
    eventually(|| update.is_done()).await;
    assert_eq!(provisioner.events(), vec!["reduce w1 1".to_string()]);
    assert_eq!(w1.capacity(), cpus(3));
}

#[test]
fn busy_hold_lasts_until_the_update_settles() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);
    let update = Arc::new(ResourceUpdate::reduce(cpus(1)));
    let busy = s.mark_busy("w1", update.clone()).unwrap();
    assert_eq!(status(&s, busy), ActionStatus::Finished);

    let w1 = s.worker("w1").unwrap();
    assert_eq!(w1.free_capacity(), cpus(1));
    let t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t2 = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(status(&s, t2), ActionStatus::Waiting);
    assert!(!update.is_done());

    s.complete_resource_update("w1", &update).unwrap();
    assert!(update.is_done());
    assert_eq!(w1.capacity(), cpus(1));
    assert!(matches!(
        s.complete_resource_update("w1", &update),
        Err(SchedulerError::InvalidUpdate { .. })
    ));

    s.action_completed(t1).unwrap();
    assert_eq!(status(&s, t2), ActionStatus::Running);
}

#[test]
fn increase_drains_the_queue() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    let _t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t2 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t3 = s.submit_task(TaskPayload::new(1)).unwrap();
    assert_eq!(s.blocked_forever(), vec![t3]);

    s.increase_worker("w1", cpus(3)).unwrap();
    assert_eq!(status(&s, t2), ActionStatus::Running);
    assert_eq!(status(&s, t3), ActionStatus::Running);
    assert_eq!(s.worker("w1").unwrap().capacity(), cpus(4));
}

// ── Profiles ───────────────────────────────────────────────────────

#[test]
fn profiles_persist_and_survive_worker_departure() {
    let store = StateStore::open_in_memory().unwrap();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = TaskScheduler::builder(dispatcher)
        .with_store(store.clone())
        .build()
        .unwrap();
    s.register_core(core(0, &[1]));
    join(&s, "w1", 1);

    let t = s.submit_task(TaskPayload::new(0)).unwrap();
    s.action_completed(t).unwrap();
    let live = store.worker_profiles("w1").unwrap();
    assert_eq!(live["C0.impl0()"].executions(), 1);
    assert!(s.profiles_snapshot().resources["w1"].implementations.contains_key("C0.impl0()"));

    s.worker_left("w1").unwrap();
    assert!(store.worker_profiles("w1").unwrap().is_empty());
    assert!(store.retired_profiles().unwrap().contains_key("C0.impl0()"));
    assert!(s.profiles_snapshot().retired.contains_key("C0.impl0()"));

    let restarted = TaskScheduler::builder(Arc::new(RecordingDispatcher::default()))
        .with_store(store)
        .build()
        .unwrap();
    assert_eq!(restarted.context().retired_profile("C0.impl0()").unwrap().executions(), 1);
}

#[test]
fn stored_profiles_warm_up_joining_workers() {
    let store = StateStore::open_in_memory().unwrap();
    store
        .put_profile("w1", "C0.impl0()", &taskgrid_placement::Profile::single(40))
        .unwrap();
    let s = TaskScheduler::builder(Arc::new(RecordingDispatcher::default()))
        .with_store(store)
        .build()
        .unwrap();
    s.register_core(core(0, &[1]));
    join(&s, "w1", 1);

    let w1 = s.worker("w1").unwrap();
    assert_eq!(w1.profile("C0.impl0()").unwrap().average_time(), 40);
    let implementation = s.context().implementations(0).remove(0);
    assert_eq!(w1.expected_duration(&implementation), 40);
}
