//! taskgrid.toml configuration parser.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CoreElement, Implementation, ResourceDescription, WorkerDescription};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskgridConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub elasticity: ElasticityConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub cores: Vec<CoreConfig>,
    #[serde(default)]
    pub shared_disks: Vec<SharedDiskConfig>,
}

/// How resource-dependency edges produced by the gap walk are used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingPolicy {
    /// Gaps only feed estimates; capacity is enforced by the waiting queue.
    #[default]
    Ready,
    /// Pending gap origins become resource predecessors and gate launches.
    FullGraph,
    /// Free tasks launch one at a time in priority-then-id order. A task
    /// never overtakes an older or higher-priority one still waiting for
    /// room.
    OrderStrict,
}

impl SchedulingPolicy {
    /// Resource edges taken from the gap walk gate launches.
    pub fn gates_on_gaps(self) -> bool {
        self == Self::FullGraph
    }

    /// Actions are placed before their data predecessors finish.
    pub fn places_early(self) -> bool {
        self == Self::FullGraph
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub policy: SchedulingPolicy,
    pub optimizer_interval_ms: u64,
    pub optimizer_initial_delay_ms: u64,
    pub max_task_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::Ready,
            optimizer_interval_ms: 5000,
            optimizer_initial_delay_ms: 500,
            max_task_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticityConfig {
    pub provisioning_threads: usize,
    pub min_workers: u32,
    pub max_workers: u32,
    pub scale_interval_secs: u64,
    pub scale_up_cooldown_secs: u64,
    pub scale_down_cooldown_secs: u64,
    /// Capacity of a worker created by the pool scaler.
    pub template: ResourceDescription,
}

impl Default for ElasticityConfig {
    fn default() -> Self {
        Self {
            provisioning_threads: 4,
            min_workers: 0,
            max_workers: 0,
            scale_interval_secs: 30,
            scale_up_cooldown_secs: 60,
            scale_down_cooldown_secs: 300,
            template: ResourceDescription::cpus(4),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub profile_db: Option<String>,
    pub profile_snapshot: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,taskgrid=debug".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    #[serde(flatten)]
    pub capacity: ResourceDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub name: String,
    #[serde(default)]
    pub implementations: Vec<ImplementationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationConfig {
    pub signature: String,
    #[serde(flatten)]
    pub requirements: ResourceDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedDiskConfig {
    pub name: String,
    #[serde(default)]
    pub mounted_on: Vec<String>,
}

/// Semantic problems found after parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate worker name: {0}")]
    DuplicateWorker(String),

    #[error("core {0} declares no implementations")]
    EmptyCore(String),

    #[error("min_workers ({min}) exceeds max_workers ({max})")]
    WorkerBounds { min: u32, max: u32 },

    #[error("provisioning_threads must be at least 1")]
    NoProvisioningThreads,
}

impl TaskgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TaskgridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for worker in &self.workers {
            if !seen.insert(worker.name.as_str()) {
                return Err(ConfigError::DuplicateWorker(worker.name.clone()));
            }
        }
        if let Some(core) = self.cores.iter().find(|c| c.implementations.is_empty()) {
            return Err(ConfigError::EmptyCore(core.name.clone()));
        }
        let e = &self.elasticity;
        if e.max_workers > 0 && e.min_workers > e.max_workers {
            return Err(ConfigError::WorkerBounds {
                min: e.min_workers,
                max: e.max_workers,
            });
        }
        if e.provisioning_threads == 0 {
            return Err(ConfigError::NoProvisioningThreads);
        }
        Ok(())
    }

    /// Core elements in declaration order; ids are positional.
    pub fn core_elements(&self) -> Vec<CoreElement> {
        self.cores
            .iter()
            .enumerate()
            .map(|(core_id, core)| {
                let core_id = core_id as u32;
                CoreElement {
                    id: core_id,
                    name: core.name.clone(),
                    implementations: core
                        .implementations
                        .iter()
                        .enumerate()
                        .map(|(impl_id, i)| {
                            Implementation::new(core_id, impl_id as u32, i.signature.clone(), i.requirements)
                        })
                        .collect(),
                }
            })
            .collect()
    }

    pub fn worker_descriptions(&self) -> Vec<WorkerDescription> {
        self.workers
            .iter()
            .map(|w| WorkerDescription::new(w.name.clone(), w.capacity))
            .collect()
    }

    /// Shared disk name to the workers that mount it.
    pub fn shared_disk_mounts(&self) -> HashMap<String, Vec<String>> {
        self.shared_disks
            .iter()
            .map(|d| (d.name.clone(), d.mounted_on.clone()))
            .collect()
    }

    /// Scaffold a small single-worker configuration.
    pub fn scaffold(worker: &str, cpus: u32) -> Self {
        TaskgridConfig {
            workers: vec![WorkerConfig {
                name: worker.to_string(),
                capacity: ResourceDescription::cpus(cpus),
            }],
            cores: vec![CoreConfig {
                name: "increment".to_string(),
                implementations: vec![ImplementationConfig {
                    signature: "Increment.run(FILE_T)".to_string(),
                    requirements: ResourceDescription::cpus(1),
                }],
            }],
            ..Default::default()
        }
    }
}
