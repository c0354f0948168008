//! Shared fixtures for scheduler integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use taskgrid_core::config::{SchedulerConfig, SchedulingPolicy};
use taskgrid_core::{CoreElement, CoreId, Implementation, ResourceDescription, WorkerDescription};
use taskgrid_scheduler::*;

/// Records every launch; tests drive completion by hand.
#[derive(Default)]
pub struct RecordingDispatcher {
    launches: Mutex<Vec<Launch>>,
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, launch: Launch) {
        self.launches.lock().unwrap().push(launch);
    }
}

impl RecordingDispatcher {
    pub fn launched(&self) -> Vec<ActionId> {
        self.launches.lock().unwrap().iter().map(|l| l.action).collect()
    }

    pub fn last_for(&self, id: ActionId) -> Option<Launch> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|l| l.action == id)
            .cloned()
    }
}

pub fn cpus(n: u32) -> ResourceDescription {
    ResourceDescription::cpus(n)
}

/// A core with one implementation per requirement, `C{id}.impl{i}()`.
pub fn core(id: CoreId, requirements: &[u32]) -> CoreElement {
    CoreElement {
        id,
        name: format!("core{id}"),
        implementations: requirements
            .iter()
            .enumerate()
            .map(|(i, c)| Implementation::new(id, i as u32, format!("C{id}.impl{i}()"), cpus(*c)))
            .collect(),
    }
}

pub fn config(policy: SchedulingPolicy) -> SchedulerConfig {
    SchedulerConfig {
        policy,
        ..Default::default()
    }
}

pub fn scheduler(policy: SchedulingPolicy) -> (Arc<TaskScheduler>, Arc<RecordingDispatcher>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = TaskScheduler::builder(dispatcher.clone())
        .with_config(config(policy))
        .build()
        .unwrap();
    (scheduler, dispatcher)
}

/// Scheduler with core 0 (1 cpu) and core 1 (2 cpus) registered.
pub fn with_cores(policy: SchedulingPolicy) -> (Arc<TaskScheduler>, Arc<RecordingDispatcher>) {
    let (s, d) = scheduler(policy);
    s.register_core(core(0, &[1]));
    s.register_core(core(1, &[2]));
    (s, d)
}

pub fn join(s: &TaskScheduler, name: &str, n: u32) {
    s.worker_joined(WorkerDescription::new(name, cpus(n))).unwrap();
}

pub fn status(s: &TaskScheduler, id: ActionId) -> ActionStatus {
    s.status(id).unwrap()
}

pub fn resource_of(s: &TaskScheduler, id: ActionId) -> Option<String> {
    s.actions().get(id).unwrap().assigned_resource()
}
