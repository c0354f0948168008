//! taskgrid-state: persisted execution profiles.
//!
//! Backed by [redb](https://docs.rs/redb), keeps the per-worker profile
//! tables the scheduler learns while it runs, so that a restarted runtime
//! starts with real cost estimates instead of defaults.
//!
//! # Architecture
//!
//! Profiles are JSON-serialized into redb's `&[u8]` value columns. Live
//! workers are keyed `{worker}:{signature}`; profiles of workers that left
//! the pool are folded into a single table keyed by `{signature}`.
//!
//! The same data can be exported as a [`ProfileSnapshot`], a plain JSON
//! document:
//!
//! ```text
//! {"resources": {"w1": {"implementations": {"A.run()": {"executions": 3,
//!   "minTime": 10, "avgTime": 12, "maxTime": 15}}}}, "retired": {...}}
//! ```
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
