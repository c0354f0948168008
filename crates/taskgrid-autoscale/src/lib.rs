//! taskgrid-autoscale: resource pool elasticity plumbing.
//!
//! The scheduler models starting, stopping and shrinking a worker as
//! actions of its own; this crate supplies everything those actions need
//! from the outside world.
//!
//! # Components
//!
//! - **`provisioning`**: the `Provisioner` seam and a bounded pool that
//!   runs provisioning futures without spawning a thread per request
//! - **`listener`**: counts outstanding operations, releases waiters at
//!   zero, keeps the first error
//! - **`update`**: pending resource updates with a completion barrier
//! - **`scaler`**: decides when the pool should grow or shrink
//!
//! # Scaling Algorithm
//!
//! ```text
//! pressure = waiting actions + actions with no compatible worker
//! current  = workers + starts in flight
//!
//! if current < min_workers:
//!     Grow(min_workers - current)
//! if pressure > 0 and current < max_workers:
//!     Grow(min(ceil(pressure / actions_per_worker), max_workers - current))
//! if pressure == 0 and an idle worker exists and workers > min_workers:
//!     Shrink(idle worker)
//! ```
//!
//! Cooldown windows prevent oscillation.

pub mod listener;
pub mod provisioning;
pub mod scaler;
pub mod update;

pub use listener::OperationListener;
pub use provisioning::{BoxFuture, Provisioner, ProvisioningPool, drain_and_stop};
pub use scaler::{PoolLoad, PoolScaler, ScaleDecision, ScalePolicy};
pub use update::{ResourceUpdate, UpdateKind};
