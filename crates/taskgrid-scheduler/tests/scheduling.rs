//! Scheduling integration tests.
//!
//! Drive a `TaskScheduler` end to end with a recording dispatcher:
//! placement, admission against capacity, data dependencies, error
//! policies and worker churn. Completion is signalled by hand so every
//! interleaving is deterministic, except in the concurrency test.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use taskgrid_core::WorkerDescription;
use taskgrid_core::config::SchedulingPolicy;
use taskgrid_scheduler::*;

// ── Identity and dependencies ──────────────────────────────────────

#[test]
fn ids_follow_creation_order_and_survive_pruning() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 4);

    let first = s.submit_task(TaskPayload::new(0)).unwrap();
    let second = s.create_task(TaskPayload::new(0));
    assert!(first < second);

    s.action_completed(first).unwrap();
    assert_eq!(s.prune(), 1);
    let third = s.create_task(TaskPayload::new(0));
    assert!(third > second);
    assert!(s.status(first).is_err());
}

#[test]
fn pending_data_predecessor_blocks_launch() {
    let (s, d) = with_cores(SchedulingPolicy::FullGraph);
    join(&s, "w1", 4);

    let a = s.create_task(TaskPayload::new(0));
    let b = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    s.submit(a, None).unwrap();
    s.submit(b, None).unwrap();

    // Placed ahead of time, but gated.
    assert_eq!(resource_of(&s, b).as_deref(), Some("w1"));
    assert_eq!(s.try_to_launch(b).unwrap(), LaunchOutcome::NotReady);
    assert_eq!(status(&s, b), ActionStatus::Runnable);
    let action_a = s.actions().get(a).unwrap();
    let action_b = s.actions().get(b).unwrap();
    assert!(action_b.expectations().0 >= action_a.expectations().1);

    assert_eq!(s.action_completed(a).unwrap(), vec![b]);
    assert_eq!(status(&s, b), ActionStatus::Running);
    assert_eq!(d.launched(), vec![a, b]);
}

#[test]
fn completion_releases_data_successors() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);

    let a = s.create_task(TaskPayload::new(0));
    let b = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    s.submit(a, None).unwrap();
    s.submit(b, None).unwrap();
    assert_eq!(resource_of(&s, b), None);

    let freed = s.action_completed(a).unwrap();
    assert_eq!(freed, vec![b]);
    let action_b = s.actions().get(b).unwrap();
    assert!(action_b.data_predecessors().is_empty());
    assert_eq!(action_b.status(), ActionStatus::Running);
}

#[test]
fn dependency_on_finished_action_adds_no_edge() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    s.action_completed(a).unwrap();
    let b = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    assert!(s.actions().get(b).unwrap().data_predecessors().is_empty());

    let c = s.submit_task(TaskPayload::new(0).on_failure(OnFailure::Fail)).unwrap();
    s.action_failed(c, "boom").unwrap();
    let d = s.create_task(TaskPayload::new(0));
    assert!(matches!(
        s.add_data_dependency(c, d),
        Err(SchedulerError::InvalidState { .. })
    ));
}

#[test]
fn failure_cascades_through_successors() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 4);

    let a = s.create_task(TaskPayload::new(0).on_failure(OnFailure::Fail));
    let b = s.create_task(TaskPayload::new(0));
    let c = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    s.add_data_dependency(b, c).unwrap();
    for id in [a, b, c] {
        s.submit(id, None).unwrap();
    }

    let outcome = s.action_failed(a, "segfault").unwrap();
    assert_eq!(outcome, FailureOutcome::Failed(vec![a, b, c]));
    for id in [a, b, c] {
        assert_eq!(status(&s, id), ActionStatus::Failed);
    }
    assert!(s.hosted_on("w1").unwrap().is_empty());
}

// ── Capacity ───────────────────────────────────────────────────────

#[test]
fn four_units_run_four_tasks_and_queue_the_fifth() {
    let (s, d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 4);

    let ids: Vec<_> = (0..5).map(|_| s.submit_task(TaskPayload::new(0)).unwrap()).collect();
    let running = ids.iter().filter(|id| status(&s, **id) == ActionStatus::Running).count();
    assert_eq!(running, 4);
    assert_eq!(status(&s, ids[4]), ActionStatus::Waiting);
    assert_eq!(s.blocked_on("w1").unwrap(), vec![ids[4]]);
    assert_eq!(d.launched().len(), 4);

    s.action_completed(ids[2]).unwrap();
    assert_eq!(status(&s, ids[4]), ActionStatus::Running);
    assert_eq!(d.launched().last(), Some(&ids[4]));
    assert!(s.blocked_on("w1").unwrap().is_empty());
}

#[test]
fn reservations_never_exceed_capacity() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 4);
    let w1 = s.worker("w1").unwrap();

    let ids: Vec<_> = (0..3).map(|_| s.submit_task(TaskPayload::new(1)).unwrap()).collect();
    assert!(w1.capacity().fits(&w1.reserved()));
    assert_eq!(w1.reserved(), cpus(4));
    assert_eq!(status(&s, ids[2]), ActionStatus::Waiting);

    s.action_completed(ids[0]).unwrap();
    assert!(w1.capacity().fits(&w1.reserved()));
    assert_eq!(status(&s, ids[2]), ActionStatus::Running);
}

#[test]
fn waiting_queue_ignores_priority() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    let _b = s.submit_task(TaskPayload::new(0)).unwrap();
    let x = s.submit_task(TaskPayload::new(0)).unwrap();
    let y = s.submit_task(TaskPayload::new(0).high_priority()).unwrap();
    assert_eq!(s.blocked_on("w1").unwrap(), vec![x, y]);

    s.action_completed(a).unwrap();
    assert_eq!(status(&s, x), ActionStatus::Running);
    assert_eq!(status(&s, y), ActionStatus::Waiting);
}

#[test]
fn unplaceable_action_waits_for_a_capable_worker() {
    let (s, _d) = scheduler(SchedulingPolicy::Ready);
    s.register_core(core(0, &[8]));
    join(&s, "w1", 4);

    let t = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(s.blocked_forever(), vec![t]);
    assert_eq!(status(&s, t), ActionStatus::Runnable);
    assert_eq!(s.pool_load().unassigned_actions, 1);

    join(&s, "w2", 8);
    assert!(s.blocked_forever().is_empty());
    assert_eq!(resource_of(&s, t).as_deref(), Some("w2"));
    assert_eq!(status(&s, t), ActionStatus::Running);
}

#[test]
fn core_registered_after_join_reaches_existing_workers() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);

    let early = s.submit_task(TaskPayload::new(7)).unwrap();
    assert_eq!(s.blocked_forever(), vec![early]);

    s.register_core(core(7, &[1]));
    assert!(s.blocked_forever().is_empty());
    assert_eq!(s.context().workers_for(7), vec!["w1".to_string()]);
    assert_eq!(status(&s, early), ActionStatus::Running);

    let late = s.submit_task(TaskPayload::new(7)).unwrap();
    assert_eq!(resource_of(&s, late).as_deref(), Some("w1"));
    assert_eq!(status(&s, late), ActionStatus::Running);
}

// ── Placement constraints ──────────────────────────────────────────

#[test]
fn enforced_target_outside_candidates_is_unassigned() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    for name in ["r1", "r2", "r3"] {
        join(&s, name, 2);
    }

    let t = s.create_task(TaskPayload::new(0));
    s.set_enforced_target(t, "r1").unwrap();
    let err = s.schedule_on(t, &["r2".to_string(), "r3".to_string()]).unwrap_err();
    assert!(matches!(err, SchedulerError::Unassigned(id) if id == t));
    assert_eq!(resource_of(&s, t), None);
    assert_eq!(status(&s, t), ActionStatus::Runnable);

    s.submit(t, None).unwrap();
    assert_eq!(resource_of(&s, t).as_deref(), Some("r1"));
}

#[test]
fn constrained_action_follows_its_predecessor() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    join(&s, "w2", 1);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    let home = resource_of(&s, a).unwrap();
    let b = s.create_task(TaskPayload::new(0));
    s.add_constraining_predecessor(b, a).unwrap();
    s.submit(b, None).unwrap();

    // The other worker is idle, but b must share a's worker.
    assert_eq!(resource_of(&s, b), Some(home.clone()));
    assert_eq!(status(&s, b), ActionStatus::Waiting);
    s.action_completed(a).unwrap();
    assert_eq!(status(&s, b), ActionStatus::Running);
}

#[test]
fn idle_worker_wins_placement() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    join(&s, "w2", 1);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    let b = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_ne!(resource_of(&s, a), resource_of(&s, b));
    assert_eq!(status(&s, b), ActionStatus::Running);
}

// ── Resource graph ─────────────────────────────────────────────────

#[test]
fn unscheduling_links_predecessor_to_successor() {
    let (s, _d) = with_cores(SchedulingPolicy::FullGraph);
    join(&s, "w1", 1);

    let p = s.submit_task(TaskPayload::new(0)).unwrap();
    let m = s.submit_task(TaskPayload::new(0)).unwrap();
    let n = s.submit_task(TaskPayload::new(0)).unwrap();
    let table = s.actions();
    assert_eq!(table.get(m).unwrap().resource_predecessors(), vec![p]);
    assert_eq!(table.get(n).unwrap().resource_predecessors(), vec![m]);
    assert_eq!(s.try_to_launch(m).unwrap(), LaunchOutcome::NotReady);

    let freed = s.worker("w1").unwrap().unschedule_action(table, m);
    assert!(freed.is_empty());
    let pred = table.get(p).unwrap();
    let succ = table.get(n).unwrap();
    assert_eq!(pred.resource_successors(), vec![n]);
    assert_eq!(succ.resource_predecessors(), vec![p]);
    assert!(!pred.resource_successors().contains(&m));
    assert!(!succ.resource_predecessors().contains(&m));
}

#[test]
fn full_graph_launches_resource_successor_on_completion() {
    let (s, _d) = with_cores(SchedulingPolicy::FullGraph);
    join(&s, "w1", 1);

    let p = s.submit_task(TaskPayload::new(0)).unwrap();
    let m = s.submit_task(TaskPayload::new(0)).unwrap();
    let n = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(status(&s, m), ActionStatus::Runnable);

    s.action_completed(p).unwrap();
    assert_eq!(status(&s, m), ActionStatus::Running);
    assert_eq!(status(&s, n), ActionStatus::Runnable);
    assert!(s.actions().get(n).unwrap().resource_predecessors() == vec![m]);
}

#[test]
fn full_graph_retry_does_not_wait_on_its_successor() {
    let (s, d) = with_cores(SchedulingPolicy::FullGraph);
    join(&s, "w1", 1);

    let a = s.create_task(TaskPayload::new(0));
    let b = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    s.submit(a, None).unwrap();
    s.submit(b, None).unwrap();
    assert_eq!(s.actions().get(b).unwrap().resource_predecessors(), vec![a]);

    // The retry lands behind b's gap but must not depend on b.
    assert_eq!(s.action_failed(a, "flaky").unwrap(), FailureOutcome::Retried);
    assert_eq!(status(&s, a), ActionStatus::Running);
    assert!(s.actions().get(a).unwrap().resource_predecessors().is_empty());

    assert_eq!(s.action_completed(a).unwrap(), vec![b]);
    assert_eq!(status(&s, b), ActionStatus::Running);
    assert_eq!(d.launched(), vec![a, a, b]);
}

#[test]
fn full_graph_successor_submitted_first_still_runs() {
    let (s, d) = with_cores(SchedulingPolicy::FullGraph);
    join(&s, "w1", 1);

    let a = s.create_task(TaskPayload::new(0));
    let b = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    s.submit(b, None).unwrap();
    s.submit(a, None).unwrap();

    assert_eq!(status(&s, a), ActionStatus::Running);
    assert!(s.actions().get(a).unwrap().resource_predecessors().is_empty());
    s.action_completed(a).unwrap();
    assert_eq!(status(&s, b), ActionStatus::Running);
    s.action_completed(b).unwrap();
    assert_eq!(d.launched(), vec![a, b]);
}

#[test]
fn full_graph_uses_capacity_added_at_runtime() {
    let (s, _d) = with_cores(SchedulingPolicy::FullGraph);
    join(&s, "w1", 1);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    s.increase_worker("w1", cpus(1)).unwrap();
    let b = s.submit_task(TaskPayload::new(0)).unwrap();

    assert_eq!(status(&s, a), ActionStatus::Running);
    assert_eq!(status(&s, b), ActionStatus::Running);
    assert!(s.actions().get(b).unwrap().resource_predecessors().is_empty());
    let w1 = s.worker("w1").unwrap();
    assert!(w1.free_capacity().is_empty());
    assert_eq!(w1.capacity(), cpus(2));
}

// ── Error policies ─────────────────────────────────────────────────

#[test]
fn retries_until_budget_is_spent() {
    let (s, d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);

    let t = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(s.action_failed(t, "flaky").unwrap(), FailureOutcome::Retried);
    assert_eq!(status(&s, t), ActionStatus::Running);
    assert_eq!(s.action_failed(t, "flaky").unwrap(), FailureOutcome::Retried);
    assert_eq!(s.actions().get(t).unwrap().attempts(), 2);
    assert_eq!(d.launched(), vec![t, t, t]);

    assert_eq!(s.action_failed(t, "flaky").unwrap(), FailureOutcome::Failed(vec![t]));
    assert_eq!(status(&s, t), ActionStatus::Failed);
    assert_eq!(s.worker("w1").unwrap().free_capacity(), cpus(1));
}

#[test]
fn ignored_failure_releases_successors() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 2);

    let a = s.create_task(TaskPayload::new(0).on_failure(OnFailure::Ignore));
    let b = s.create_task(TaskPayload::new(0));
    s.add_data_dependency(a, b).unwrap();
    s.submit(a, None).unwrap();
    s.submit(b, None).unwrap();

    assert_eq!(s.action_failed(a, "partial output").unwrap(), FailureOutcome::Ignored(vec![b]));
    assert_eq!(status(&s, a), ActionStatus::Finished);
    assert_eq!(status(&s, b), ActionStatus::Running);
}

#[test]
fn notifications_for_idle_actions_are_rejected() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    let t = s.create_task(TaskPayload::new(0));
    assert!(matches!(s.action_completed(t), Err(SchedulerError::InvalidState { .. })));
    assert!(matches!(s.action_failed(t, "x"), Err(SchedulerError::InvalidState { .. })));
}

#[test]
fn notifier_completes_through_the_scheduler() {
    let (s, d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    let b = s.submit_task(TaskPayload::new(0)).unwrap();
    let launch = d.last_for(a).unwrap();
    assert_eq!(launch.worker, "w1");
    assert_eq!(launch.implementation.signature, "C0.impl0()");
    launch.notifier.completed();

    assert_eq!(status(&s, a), ActionStatus::Finished);
    assert_eq!(status(&s, b), ActionStatus::Running);
    d.last_for(b).unwrap().notifier.failed("lost");
    assert_eq!(s.actions().get(b).unwrap().attempts(), 1);
}

// ── Order-strict policy ────────────────────────────────────────────

#[test]
fn order_strict_never_lets_a_task_overtake() {
    let (s, d) = with_cores(SchedulingPolicy::OrderStrict);
    join(&s, "w1", 2);

    let a = s.submit_task(TaskPayload::new(1)).unwrap();
    let b = s.submit_task(TaskPayload::new(0)).unwrap();
    let c = s.submit_task(TaskPayload::new(1)).unwrap();
    assert_eq!(status(&s, a), ActionStatus::Running);
    assert_eq!(s.queued_in_order(), vec![b, c]);
    assert_eq!(resource_of(&s, b), None);

    // One unit stays free after b starts, but c needs two and d is behind it.
    s.action_completed(a).unwrap();
    let d_task = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(status(&s, b), ActionStatus::Running);
    assert_eq!(status(&s, c), ActionStatus::Runnable);
    assert_eq!(status(&s, d_task), ActionStatus::Runnable);
    assert_eq!(s.queued_in_order(), vec![c, d_task]);
    assert_eq!(s.pool_load().waiting_actions, 2);

    s.action_completed(b).unwrap();
    assert_eq!(status(&s, c), ActionStatus::Running);
    assert_eq!(status(&s, d_task), ActionStatus::Runnable);

    s.action_completed(c).unwrap();
    assert_eq!(status(&s, d_task), ActionStatus::Running);
    assert_eq!(d.launched(), vec![a, b, c, d_task]);
}

#[test]
fn order_strict_serves_priority_before_age() {
    let (s, d) = with_cores(SchedulingPolicy::OrderStrict);
    join(&s, "w1", 1);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    let b = s.submit_task(TaskPayload::new(0)).unwrap();
    let c = s.create_task(TaskPayload::new(0).high_priority());
    s.submit(c, None).unwrap();
    assert_eq!(s.queued_in_order(), vec![c, b]);

    s.action_completed(a).unwrap();
    assert_eq!(status(&s, c), ActionStatus::Running);
    s.action_completed(c).unwrap();
    assert_eq!(status(&s, b), ActionStatus::Running);
    assert_eq!(d.launched(), vec![a, c, b]);
}

#[test]
fn order_strict_parks_tasks_no_worker_can_run() {
    let (s, _d) = with_cores(SchedulingPolicy::OrderStrict);
    s.register_core(core(2, &[8]));
    join(&s, "w1", 2);

    let big = s.submit_task(TaskPayload::new(2)).unwrap();
    let small = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(s.blocked_forever(), vec![big]);
    assert!(s.queued_in_order().is_empty());
    assert_eq!(status(&s, small), ActionStatus::Running);
}

#[test]
fn order_strict_retry_takes_its_turn_again() {
    let (s, d) = with_cores(SchedulingPolicy::OrderStrict);
    join(&s, "w1", 1);

    let a = s.submit_task(TaskPayload::new(0)).unwrap();
    let b = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(s.action_failed(a, "flaky").unwrap(), FailureOutcome::Retried);

    // b was next in line when the unit came back; a queues behind it.
    assert_eq!(status(&s, a), ActionStatus::Runnable);
    assert_eq!(status(&s, b), ActionStatus::Running);
    assert_eq!(s.queued_in_order(), vec![a]);

    s.action_completed(b).unwrap();
    assert_eq!(status(&s, a), ActionStatus::Running);
    assert_eq!(d.launched(), vec![a, b, a]);
}

// ── Worker churn ───────────────────────────────────────────────────

#[test]
fn departing_worker_hands_back_its_actions() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);

    let t1 = s.submit_task(TaskPayload::new(0)).unwrap();
    let t2 = s.submit_task(TaskPayload::new(0)).unwrap();
    assert_eq!(status(&s, t2), ActionStatus::Waiting);

    let running = s.worker_left("w1").unwrap();
    assert_eq!(running, vec![t1]);
    assert!(s.worker_names().is_empty());
    assert_eq!(s.blocked_forever(), vec![t2]);
    assert_eq!(status(&s, t2), ActionStatus::Runnable);

    join(&s, "w2", 1);
    assert_eq!(status(&s, t2), ActionStatus::Running);
    assert_eq!(s.action_failed(t1, "worker lost").unwrap(), FailureOutcome::Retried);
    assert_eq!(resource_of(&s, t1).as_deref(), Some("w2"));
    assert_eq!(status(&s, t1), ActionStatus::Waiting);
}

#[test]
fn duplicate_worker_is_rejected() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    let err = s.worker_joined(WorkerDescription::new("w1", cpus(2))).unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerExists(name) if name == "w1"));
}

#[test]
fn pool_load_reflects_queues() {
    let (s, _d) = with_cores(SchedulingPolicy::Ready);
    join(&s, "w1", 1);
    join(&s, "w2", 1);

    let load = s.pool_load();
    assert_eq!(load.workers, 2);
    assert_eq!(load.idle_workers, vec!["w1".to_string(), "w2".to_string()]);

    for _ in 0..3 {
        s.submit_task(TaskPayload::new(0)).unwrap();
    }
    let load = s.pool_load();
    assert_eq!(load.waiting_actions, 1);
    assert!(load.idle_workers.is_empty());
}

// ── Concurrency ────────────────────────────────────────────────────

/// Completes every launch from its own thread after a short delay.
struct ThreadedDispatcher;

impl Dispatcher for ThreadedDispatcher {
    fn dispatch(&self, launch: Launch) {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            launch.notifier.completed();
        });
    }
}

#[test]
fn concurrent_chains_all_finish() {
    let s = TaskScheduler::builder(Arc::new(ThreadedDispatcher)).build().unwrap();
    s.register_core(core(0, &[1]));
    join(&s, "w1", 3);
    join(&s, "w2", 2);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let s = s.clone();
            thread::spawn(move || {
                let mut ids = Vec::new();
                let mut previous = None;
                for _ in 0..10 {
                    let id = s.create_task(TaskPayload::new(0));
                    if let Some(p) = previous {
                        s.add_data_dependency(p, id).unwrap();
                    }
                    s.submit(id, None).unwrap();
                    previous = Some(id);
                    ids.push(id);
                }
                ids
            })
        })
        .collect();
    let ids: Vec<ActionId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

    let workers = [s.worker("w1").unwrap(), s.worker("w2").unwrap()];
    let settled = || {
        ids.iter().all(|id| s.status(*id).unwrap() == ActionStatus::Finished)
            && workers.iter().all(|w| w.reserved().is_empty())
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while !settled() {
        assert!(Instant::now() < deadline, "actions did not finish in time");
        thread::sleep(Duration::from_millis(5));
    }
    for w in &workers {
        assert_eq!(w.free_capacity(), w.capacity());
        assert!(w.blocked().is_empty());
    }
}
