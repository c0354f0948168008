//! Daemon assembly: store, scheduler, background loops and the demo workload.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use taskgrid_autoscale::{PoolScaler, ProvisioningPool, ScaleDecision, ScalePolicy};
use taskgrid_core::config::TaskgridConfig;
use taskgrid_core::{ResourceDescription, WorkerDescription};
use taskgrid_scheduler::{ActionId, ActionStatus, ScheduleOptimizer, SchedulingContext, TaskPayload, TaskScheduler};
use taskgrid_state::{ProfileSnapshot, StateStore};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::simulate::{SimulatedDispatcher, SimulatedProvisioner};

/// Tasks submitted at startup.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub tasks: usize,
    /// Each task depends on the one before it.
    pub chain: bool,
    pub task_time: Duration,
    pub boot_time: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub finished: usize,
    pub failed: usize,
}

/// Open the profile store and warm it up from the snapshot, if any.
fn open_store(config: &TaskgridConfig) -> anyhow::Result<StateStore> {
    let store = match &config.state.profile_db {
        Some(path) => {
            let store = StateStore::open(Path::new(path))?;
            info!(%path, "profile store opened");
            store
        }
        None => StateStore::open_in_memory()?,
    };
    if let Some(path) = &config.state.profile_snapshot
        && Path::new(path).exists()
    {
        let snapshot = ProfileSnapshot::load(Path::new(path))?;
        store.import(&snapshot)?;
        info!(%path, workers = snapshot.resources.len(), "profile snapshot imported");
    }
    Ok(store)
}

fn build_scheduler(config: &TaskgridConfig, store: StateStore, workload: &Workload) -> anyhow::Result<Arc<TaskScheduler>> {
    let ctx = Arc::new(SchedulingContext::new());
    for (disk, workers) in config.shared_disk_mounts() {
        for worker in workers {
            ctx.mount(&disk, &worker);
        }
    }

    let handle = Handle::current();
    let pool = ProvisioningPool::new(handle.clone(), config.elasticity.provisioning_threads);
    let scheduler = TaskScheduler::builder(Arc::new(SimulatedDispatcher::new(handle, workload.task_time)))
        .with_config(config.scheduler.clone())
        .with_context(ctx)
        .with_provisioner(Arc::new(SimulatedProvisioner::new(workload.boot_time)), pool)
        .with_store(store)
        .build()?;

    for core in config.core_elements() {
        scheduler.register_core(core);
    }
    for worker in config.worker_descriptions() {
        scheduler.worker_joined(worker)?;
    }
    info!(
        workers = scheduler.worker_names().len(),
        cores = scheduler.context().core_ids().len(),
        policy = ?config.scheduler.policy,
        "scheduler initialized"
    );
    Ok(scheduler)
}

fn pool_scaler(config: &TaskgridConfig, scheduler: Arc<TaskScheduler>) -> PoolScaler {
    let e = &config.elasticity;
    let policy = ScalePolicy {
        min_workers: e.min_workers,
        max_workers: e.max_workers,
        scale_up_cooldown: Duration::from_secs(e.scale_up_cooldown_secs),
        scale_down_cooldown: Duration::from_secs(e.scale_down_cooldown_secs),
        ..Default::default()
    };
    let template = e.template;
    let next = Arc::new(AtomicU32::new(1));
    PoolScaler::new(policy).with_scale_fn(Box::new(move |decision| {
        let result = apply_decision(&scheduler, decision, template, &next);
        Box::pin(async move { result })
    }))
}

fn apply_decision(
    scheduler: &TaskScheduler,
    decision: ScaleDecision,
    template: ResourceDescription,
    next: &AtomicU32,
) -> anyhow::Result<()> {
    match decision {
        ScaleDecision::Grow(count) => {
            for _ in 0..count {
                let name = format!("auto-{}", next.fetch_add(1, Ordering::Relaxed));
                scheduler.add_worker(WorkerDescription::new(name, template))?;
            }
        }
        ScaleDecision::Shrink(worker) => {
            scheduler.stop_worker(&worker)?;
        }
        ScaleDecision::NoChange => {}
    }
    Ok(())
}

fn submit_workload(scheduler: &TaskScheduler, workload: &Workload) -> anyhow::Result<Vec<ActionId>> {
    let cores = scheduler.context().core_ids();
    if cores.is_empty() || workload.tasks == 0 {
        return Ok(Vec::new());
    }
    let mut ids = Vec::with_capacity(workload.tasks);
    for i in 0..workload.tasks {
        let id = scheduler.create_task(TaskPayload::new(cores[i % cores.len()]));
        if workload.chain
            && let Some(previous) = ids.last()
        {
            scheduler.add_data_dependency(*previous, id)?;
        }
        scheduler.submit(id, None)?;
        ids.push(id);
    }
    info!(tasks = ids.len(), chain = workload.chain, "workload submitted");
    Ok(ids)
}

fn summarize(scheduler: &TaskScheduler, ids: &[ActionId]) -> Option<RunSummary> {
    let mut summary = RunSummary::default();
    for id in ids {
        match scheduler.status(*id).ok()? {
            ActionStatus::Finished => summary.finished += 1,
            ActionStatus::Failed => summary.failed += 1,
            _ => return None,
        }
    }
    Some(summary)
}

async fn wait_for_workload(scheduler: &TaskScheduler, ids: &[ActionId]) -> RunSummary {
    loop {
        if let Some(summary) = summarize(scheduler, ids) {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Run until the workload settles, or until `stop` resolves when there is
/// no workload.
pub async fn run(
    config: TaskgridConfig,
    workload: Workload,
    stop: impl Future<Output = ()>,
) -> anyhow::Result<RunSummary> {
    let store = open_store(&config)?;
    let scheduler = build_scheduler(&config, store.clone(), &workload)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let optimizer = ScheduleOptimizer::new(scheduler.clone());
    let optimizer_handle = tokio::spawn(optimizer.run(shutdown_rx.clone()));

    let scaler_handle = if config.elasticity.min_workers > 0 || config.elasticity.max_workers > 0 {
        let mut scaler = pool_scaler(&config, scheduler.clone());
        let load_scheduler = scheduler.clone();
        let interval = Duration::from_secs(config.elasticity.scale_interval_secs.max(1));
        let scaler_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            scaler
                .run(interval, move || load_scheduler.pool_load(), scaler_shutdown)
                .await;
        }))
    } else {
        None
    };

    let ids = submit_workload(&scheduler, &workload)?;
    let summary = if ids.is_empty() {
        stop.await;
        RunSummary::default()
    } else {
        tokio::select! {
            summary = wait_for_workload(&scheduler, &ids) => summary,
            _ = stop => summarize(&scheduler, &ids).unwrap_or_default(),
        }
    };
    info!(finished = summary.finished, failed = summary.failed, "shutting down");

    let _ = shutdown_tx.send(true);
    let _ = optimizer_handle.await;
    if let Some(handle) = scaler_handle {
        let _ = handle.await;
    }

    if let Some(path) = &config.state.profile_snapshot {
        match store.export() {
            Ok(snapshot) => {
                snapshot.save(Path::new(path))?;
                info!(%path, "profile snapshot written");
            }
            Err(e) => warn!(%path, error = %e, "could not export profiles"),
        }
    }
    Ok(summary)
}

/// Print the profiles held in the store at `db` as JSON.
pub fn export_profiles(db: &Path) -> anyhow::Result<String> {
    let store = StateStore::open(db)?;
    Ok(store.export()?.to_json()?)
}
