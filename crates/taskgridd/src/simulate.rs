//! Simulated execution layer and provisioner.
//!
//! The daemon has no real workers to talk to: launched tasks sleep for a
//! fixed time and report success, and provisioning requests take a short
//! boot delay before succeeding.

use std::time::Duration;

use taskgrid_autoscale::{BoxFuture, Provisioner};
use taskgrid_core::{ResourceDescription, WorkerDescription};
use taskgrid_scheduler::{Dispatcher, Launch};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Completes every launched task after `task_time`.
pub struct SimulatedDispatcher {
    handle: Handle,
    task_time: Duration,
}

impl SimulatedDispatcher {
    pub fn new(handle: Handle, task_time: Duration) -> Self {
        Self { handle, task_time }
    }
}

impl Dispatcher for SimulatedDispatcher {
    fn dispatch(&self, launch: Launch) {
        let task_time = self.task_time;
        self.handle.spawn(async move {
            debug!(
                action = %launch.action,
                worker = %launch.worker,
                signature = %launch.implementation.signature,
                "simulating execution"
            );
            tokio::time::sleep(task_time).await;
            // Completion takes scheduler locks and may wait on a launch lock.
            let notifier = launch.notifier;
            if let Err(e) = tokio::task::spawn_blocking(move || notifier.completed()).await {
                warn!(action = %launch.action, error = %e, "completion callback panicked");
            }
        });
    }
}

/// Starts, stops and resizes workers that exist only in memory.
pub struct SimulatedProvisioner {
    boot_time: Duration,
}

impl SimulatedProvisioner {
    pub fn new(boot_time: Duration) -> Self {
        Self { boot_time }
    }
}

impl Provisioner for SimulatedProvisioner {
    fn start_worker(&self, worker: &WorkerDescription) -> BoxFuture<()> {
        let boot_time = self.boot_time;
        let name = worker.name.clone();
        Box::pin(async move {
            tokio::time::sleep(boot_time).await;
            info!(worker = %name, "simulated worker booted");
            Ok(())
        })
    }

    fn stop_worker(&self, worker: &str) -> BoxFuture<()> {
        let name = worker.to_string();
        Box::pin(async move {
            info!(worker = %name, "simulated worker shut down");
            Ok(())
        })
    }

    fn reduce_worker(&self, worker: &str, reduction: &ResourceDescription) -> BoxFuture<()> {
        debug!(%worker, %reduction, "simulated reduction");
        Box::pin(async { Ok(()) })
    }
}
