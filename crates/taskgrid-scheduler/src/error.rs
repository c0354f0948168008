//! Scheduler error types.

use thiserror::Error;

use crate::action::{ActionId, ActionStatus};

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The action sits on a worker it is not allowed to run on. The caller
    /// should unschedule and place it again.
    #[error("scheduling conflict for action {action}: {reason}")]
    SchedulingConflict { action: ActionId, reason: String },

    #[error("action {0} could not be assigned to any of the offered workers")]
    Unassigned(ActionId),

    #[error("no compatible worker for action {0}")]
    Blocked(ActionId),

    #[error("action not found: {0}")]
    ActionNotFound(ActionId),

    #[error("action {action} is {status:?}, expected {expected}")]
    InvalidState {
        action: ActionId,
        status: ActionStatus,
        expected: &'static str,
    },

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("worker already registered: {0}")]
    WorkerExists(String),

    #[error("invalid resource update on {worker}: {reason}")]
    InvalidUpdate { worker: String, reason: String },

    #[error("action {action} failed: {cause}")]
    Failed { action: ActionId, cause: String },

    #[error("state store error: {0}")]
    State(#[from] taskgrid_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
