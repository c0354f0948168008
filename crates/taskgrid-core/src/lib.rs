//! taskgrid-core: shared types and configuration for taskgrid.
//!
//! Everything the scheduling crates agree on lives here: abstract resource
//! units, core elements and their implementations, worker descriptions,
//! data locations, and the `taskgrid.toml` configuration model.

pub mod config;
pub mod types;

pub use config::TaskgridConfig;
pub use types::*;
