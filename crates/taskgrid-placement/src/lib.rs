//! taskgrid placement scoring: ordering, cost estimates, data locality.
//!
//! Pure value types consumed by the scheduler when it compares candidate
//! (worker, implementation) pairs for an action.
//!
//! # Components
//!
//! - **`score`**: four-component `Score` with lexicographic ordering
//! - **`profile`**: per-implementation execution statistics
//! - **`locality`**: data-affinity score from parameter replica locations
//!
//! # Score Ordering
//!
//! ```text
//! (priority, resource, waiting, implementation)
//!  compared left to right; the first unequal component decides;
//!  larger is better; equal scores are not better than each other.
//! ```

pub mod locality;
pub mod profile;
pub mod score;

pub use locality::{SharedDisks, locality_score};
pub use profile::{DEFAULT_EXECUTION_TIME, Profile, RunProfile};
pub use score::{Score, UNAVAILABLE_PENALTY};
