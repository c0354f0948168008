//! Domain types shared by every taskgrid crate.
//!
//! Resource capacity is expressed in abstract units (CPU, GPU, FPGA and
//! "other" slots plus memory). A worker advertises a total
//! [`ResourceDescription`]; every [`Implementation`] of a core element
//! declares the units it needs while it runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a core element (a task type the application can submit).
pub type CoreId = u32;

/// Unique name of a worker in the pool.
pub type WorkerName = String;

// ── Resource units ─────────────────────────────────────────────────

/// A bundle of abstract resource units.
///
/// Used both as a worker's capacity and as an implementation's requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDescription {
    pub cpus: u32,
    pub gpus: u32,
    pub fpgas: u32,
    pub others: u32,
    pub memory_mb: u64,
}

impl ResourceDescription {
    pub fn new(cpus: u32, gpus: u32, fpgas: u32, others: u32, memory_mb: u64) -> Self {
        Self {
            cpus,
            gpus,
            fpgas,
            others,
            memory_mb,
        }
    }

    /// Shorthand for a CPU-only description.
    pub fn cpus(cpus: u32) -> Self {
        Self {
            cpus,
            ..Self::default()
        }
    }

    /// True when no unit of any kind is left.
    pub fn is_empty(&self) -> bool {
        self.cpus == 0 && self.gpus == 0 && self.fpgas == 0 && self.others == 0 && self.memory_mb == 0
    }

    /// Whether `req` can be carved out of `self` right now.
    pub fn fits(&self, req: &ResourceDescription) -> bool {
        self.cpus >= req.cpus
            && self.gpus >= req.gpus
            && self.fpgas >= req.fpgas
            && self.others >= req.others
            && self.memory_mb >= req.memory_mb
    }

    /// Subtract `other`, saturating at zero.
    pub fn reduce(&mut self, other: &ResourceDescription) {
        self.cpus = self.cpus.saturating_sub(other.cpus);
        self.gpus = self.gpus.saturating_sub(other.gpus);
        self.fpgas = self.fpgas.saturating_sub(other.fpgas);
        self.others = self.others.saturating_sub(other.others);
        self.memory_mb = self.memory_mb.saturating_sub(other.memory_mb);
    }

    pub fn increase(&mut self, other: &ResourceDescription) {
        self.cpus += other.cpus;
        self.gpus += other.gpus;
        self.fpgas += other.fpgas;
        self.others += other.others;
        self.memory_mb += other.memory_mb;
    }

    /// Remove from both `self` and `pending` the units they have in common.
    ///
    /// Returns the amount taken. After the call, for every unit kind either
    /// `self` or `pending` is zero.
    pub fn reduce_common(&mut self, pending: &mut ResourceDescription) -> ResourceDescription {
        let taken = ResourceDescription {
            cpus: self.cpus.min(pending.cpus),
            gpus: self.gpus.min(pending.gpus),
            fpgas: self.fpgas.min(pending.fpgas),
            others: self.others.min(pending.others),
            memory_mb: self.memory_mb.min(pending.memory_mb),
        };
        self.reduce(&taken);
        pending.reduce(&taken);
        taken
    }

    /// Whether `self` still holds units of a kind that `pending` needs.
    pub fn overlaps(&self, pending: &ResourceDescription) -> bool {
        (self.cpus > 0 && pending.cpus > 0)
            || (self.gpus > 0 && pending.gpus > 0)
            || (self.fpgas > 0 && pending.fpgas > 0)
            || (self.others > 0 && pending.others > 0)
            || (self.memory_mb > 0 && pending.memory_mb > 0)
    }
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} gpu={} fpga={} other={} mem={}MB",
            self.cpus, self.gpus, self.fpgas, self.others, self.memory_mb
        )
    }
}

// ── Core elements ──────────────────────────────────────────────────

/// One way of running a core element, with its static requirements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Implementation {
    pub core_id: CoreId,
    pub impl_id: u32,
    /// Stable key used for profile persistence (`Class.method(sig)` style).
    pub signature: String,
    pub requirements: ResourceDescription,
}

impl Implementation {
    pub fn new(core_id: CoreId, impl_id: u32, signature: impl Into<String>, requirements: ResourceDescription) -> Self {
        Self {
            core_id,
            impl_id,
            signature: signature.into(),
            requirements,
        }
    }
}

/// A task type and every implementation registered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreElement {
    pub id: CoreId,
    pub name: String,
    pub implementations: Vec<Implementation>,
}

// ── Workers ────────────────────────────────────────────────────────

/// A worker as it is offered to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescription {
    pub name: WorkerName,
    pub capacity: ResourceDescription,
}

impl WorkerDescription {
    pub fn new(name: impl Into<String>, capacity: ResourceDescription) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }

    /// Static compatibility: the worker could run `implementation` when idle.
    pub fn can_run(&self, implementation: &Implementation) -> bool {
        self.capacity.fits(&implementation.requirements)
    }
}

// ── Data locations ─────────────────────────────────────────────────

/// Access mode of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    InOut,
    Concurrent,
    Commutative,
}

/// Where one replica of a data value lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataLocation {
    /// A file local to a single host.
    Private { host: String, path: String },
    /// A file on a shared disk; reachable from every host mounting `disk`.
    Shared { disk: String, path: String },
    /// An object held by a storage backend, replicated on `hosts`.
    Persistent { id: String, hosts: Vec<String> },
}

/// A task parameter and its known replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataParam {
    pub name: String,
    pub direction: Direction,
    #[serde(default)]
    pub locations: Vec<DataLocation>,
}

impl DataParam {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            locations: Vec::new(),
        }
    }

    pub fn located_at(mut self, location: DataLocation) -> Self {
        self.locations.push(location);
        self
    }
}
