//! taskgrid-scheduler: action lifecycle, capacity model and rebalancing.
//!
//! Everything the runtime executes is an `AllocatableAction`: application
//! tasks as well as the elasticity operations that start, stop and shrink
//! workers. The scheduler:
//!
//! - Places actions on (worker, implementation) pairs by `Score`
//! - Admits them against each worker's free capacity, queueing the rest
//! - Tracks data dependencies and releases successors on completion
//! - Retries, ignores or cascades execution errors per action policy
//! - Periodically moves queued work off the most loaded worker
//!
//! # Architecture
//!
//! ```text
//! TaskScheduler
//!   ├── SchedulingContext (ids, clock, cores, core→workers, disks, retired profiles)
//!   ├── ActionTable (every live action)
//!   ├── Dispatcher (hands tasks to the execution layer)
//!   ├── Provisioner + ProvisioningPool (optional, runs elasticity)
//!   ├── StateStore (optional, persists profiles)
//!   └── Per-worker ResourceScheduler
//!       ├── free capacity, hosted reservations, busy holds
//!       ├── FIFO waiting queue
//!       └── gap Timeline
//! ScheduleOptimizer ── periodic donor→receiver moves
//! ```
//!
//! # Lock Order
//!
//! ```text
//! action launch lock
//!   └── worker (ResourceScheduler) lock
//!         └── action table lock
//!               └── action state mutex
//! ```
//!
//! The scheduler's worker map, its blocked list and the context's registries
//! are leaves: they are held only long enough to copy out what they contain.

pub mod action;
pub mod context;
pub mod dispatch;
mod elasticity;
pub mod error;
pub mod gap;
pub mod kind;
pub mod optimizer;
pub mod resource;
pub mod scheduling_info;
pub mod task_scheduler;

pub use action::{ActionId, ActionStatus, ActionTable, AllocatableAction};
pub use context::SchedulingContext;
pub use dispatch::{ActionOrchestrator, CompletionNotifier, Dispatcher, Launch};
pub use error::{SchedulerError, SchedulerResult};
pub use gap::{Gap, GapAllocation, Timeline};
pub use kind::{ActionKind, ELASTICITY_CORE, ELASTICITY_PRIORITY, ErrorDecision, OnFailure, TaskPayload};
pub use optimizer::ScheduleOptimizer;
pub use resource::{Admission, Release, ResourceScheduler, WorkerLifecycle};
pub use scheduling_info::SchedulingInformation;
pub use task_scheduler::{FailureOutcome, LaunchOutcome, TaskScheduler, TaskSchedulerBuilder};
