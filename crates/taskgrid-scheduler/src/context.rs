//! Runtime context shared by every scheduling component.
//!
//! Holds what would otherwise be process-wide registries: the action id
//! counter, the clock origin, registered core elements, the core→workers
//! table used for candidate selection, shared-disk mounts, and profiles
//! inherited from workers that left the pool. Each scheduler instance gets
//! its own context, so independent runtimes can coexist in one process.
//!
//! Structural changes here (core registration, worker join/leave) are rare,
//! so coarse `RwLock`s are enough.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Instant;

use taskgrid_core::{CoreElement, CoreId, Implementation, WorkerDescription};
use taskgrid_placement::{Profile, SharedDisks};

use crate::action::ActionId;

pub struct SchedulingContext {
    next_action: AtomicU64,
    epoch: Instant,
    cores: RwLock<BTreeMap<CoreId, CoreElement>>,
    core_workers: RwLock<HashMap<CoreId, Vec<String>>>,
    shared_disks: RwLock<SharedDisks>,
    retired_profiles: Mutex<HashMap<String, Profile>>,
}

impl Default for SchedulingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingContext {
    pub fn new() -> Self {
        Self {
            next_action: AtomicU64::new(1),
            epoch: Instant::now(),
            cores: RwLock::new(BTreeMap::new()),
            core_workers: RwLock::new(HashMap::new()),
            shared_disks: RwLock::new(SharedDisks::new()),
            retired_profiles: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn next_action_id(&self) -> ActionId {
        ActionId::new(self.next_action.fetch_add(1, Ordering::SeqCst))
    }

    /// Milliseconds since the context was created.
    pub fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    // ── Core elements ──────────────────────────────────────────────

    /// Add `core` to the registry. Workers already in the core→workers
    /// table are not re-evaluated; go through
    /// [`TaskScheduler::register_core`](crate::TaskScheduler::register_core)
    /// once workers have joined.
    pub fn register_core(&self, core: CoreElement) {
        self.cores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(core.id, core);
    }

    pub fn core(&self, id: CoreId) -> Option<CoreElement> {
        self.cores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn implementations(&self, id: CoreId) -> Vec<Implementation> {
        self.core(id).map(|c| c.implementations).unwrap_or_default()
    }

    pub fn core_ids(&self) -> Vec<CoreId> {
        self.cores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    // ── Core → workers ─────────────────────────────────────────────

    /// Recompute which cores `worker` can run and update the table.
    pub fn update_worker_cores(&self, worker: &WorkerDescription) {
        let cores = self.cores.read().unwrap_or_else(PoisonError::into_inner);
        let mut table = self.core_workers.write().unwrap_or_else(PoisonError::into_inner);
        for (id, core) in cores.iter() {
            let runs = core.implementations.iter().any(|i| worker.can_run(i));
            let entry = table.entry(*id).or_default();
            let present = entry.iter().any(|w| *w == worker.name);
            if runs && !present {
                entry.push(worker.name.clone());
            } else if !runs && present {
                entry.retain(|w| *w != worker.name);
            }
        }
    }

    pub fn remove_worker(&self, worker: &str) {
        let mut table = self.core_workers.write().unwrap_or_else(PoisonError::into_inner);
        for workers in table.values_mut() {
            workers.retain(|w| w != worker);
        }
        drop(table);
        self.shared_disks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unmount_worker(worker);
    }

    /// Workers able to run at least one implementation of `core`.
    pub fn workers_for(&self, core: CoreId) -> Vec<String> {
        self.core_workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&core)
            .cloned()
            .unwrap_or_default()
    }

    // ── Shared disks ───────────────────────────────────────────────

    pub fn mount(&self, disk: &str, worker: &str) {
        self.shared_disks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mount(disk, worker);
    }

    pub fn with_shared_disks<R>(&self, f: impl FnOnce(&SharedDisks) -> R) -> R {
        f(&self.shared_disks.read().unwrap_or_else(PoisonError::into_inner))
    }

    // ── Retired profiles ───────────────────────────────────────────

    /// Fold the profiles of a departing worker into the pool-wide table.
    pub fn retire_profiles(&self, profiles: &HashMap<String, Profile>) {
        let mut retired = self.retired_profiles.lock().unwrap_or_else(PoisonError::into_inner);
        for (signature, profile) in profiles {
            retired.entry(signature.clone()).or_default().accumulate(profile);
        }
    }

    pub fn retired_profile(&self, signature: &str) -> Option<Profile> {
        self.retired_profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signature)
            .copied()
    }

    pub fn retired_profiles(&self) -> HashMap<String, Profile> {
        self.retired_profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
