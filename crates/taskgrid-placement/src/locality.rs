//! Data-locality scoring.
//!
//! A worker scores one point for every input parameter (anything that is
//! not `Out`) with at least one replica it can read without a transfer:
//! a private file on the worker itself, a file on a shared disk the worker
//! mounts, or a persistent object replicated on it.

use std::collections::{HashMap, HashSet};

use taskgrid_core::{DataLocation, DataParam, Direction};

/// Which workers mount which shared disks.
#[derive(Debug, Clone, Default)]
pub struct SharedDisks {
    mounts: HashMap<String, HashSet<String>>,
}

impl SharedDisks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mounts(mounts: HashMap<String, Vec<String>>) -> Self {
        Self {
            mounts: mounts
                .into_iter()
                .map(|(disk, workers)| (disk, workers.into_iter().collect()))
                .collect(),
        }
    }

    pub fn mount(&mut self, disk: &str, worker: &str) {
        self.mounts
            .entry(disk.to_string())
            .or_default()
            .insert(worker.to_string());
    }

    /// Forget every mount of a worker that left the pool.
    pub fn unmount_worker(&mut self, worker: &str) {
        for workers in self.mounts.values_mut() {
            workers.remove(worker);
        }
    }

    pub fn is_mounted(&self, disk: &str, worker: &str) -> bool {
        self.mounts.get(disk).is_some_and(|w| w.contains(worker))
    }

    fn reachable(&self, location: &DataLocation, worker: &str) -> bool {
        match location {
            DataLocation::Private { host, .. } => host == worker,
            DataLocation::Shared { disk, .. } => self.is_mounted(disk, worker),
            DataLocation::Persistent { hosts, .. } => hosts.iter().any(|h| h == worker),
        }
    }
}

/// Count the parameters of an action whose data is already on `worker`.
pub fn locality_score(params: &[DataParam], worker: &str, disks: &SharedDisks) -> i64 {
    params
        .iter()
        .filter(|p| p.direction != Direction::Out)
        .filter(|p| p.locations.iter().any(|l| disks.reachable(l, worker)))
        .count() as i64
}
