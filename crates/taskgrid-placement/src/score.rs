//! Action scores.
//!
//! A score ranks one candidate placement against another. Components are
//! built up in layers: the action contributes its priority, a worker adds
//! its resource and waiting terms, and an implementation adds its cost.

use std::cmp::Ordering;
use std::fmt;

/// Subtracted from the resource term when the worker cannot run an
/// implementation right now.
pub const UNAVAILABLE_PENALTY: i64 = i32::MAX as i64;

/// Comparable 4-tuple; see the crate docs for the ordering.
///
/// The derived `Ord` follows field declaration order, which is exactly the
/// lexicographic comparison `is_better` relies on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Score {
    pub priority: i64,
    pub resource: i64,
    pub waiting: i64,
    pub implementation: i64,
}

impl Score {
    pub fn new(priority: i64, resource: i64, waiting: i64, implementation: i64) -> Self {
        Self {
            priority,
            resource,
            waiting,
            implementation,
        }
    }

    /// Score carrying only the action's priority.
    pub fn for_action(priority: i64) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Layer the worker-level terms on top of an action score.
    pub fn with_resource(self, resource: i64, waiting: i64) -> Self {
        Self {
            resource,
            waiting,
            ..self
        }
    }

    /// Layer an implementation cost on top. Lower cost yields a better score.
    pub fn with_cost(self, cost_ms: u64) -> Self {
        Self {
            implementation: -(cost_ms.min(i64::MAX as u64) as i64),
            ..self
        }
    }

    /// Mark the placement as not runnable right now.
    pub fn penalized(self) -> Self {
        Self {
            resource: self.resource.saturating_sub(UNAVAILABLE_PENALTY),
            ..self
        }
    }

    /// Strictly better than `other`.
    pub fn is_better(&self, other: &Score) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    /// `is_better` over optional scores: a missing score is worse than any
    /// present one, and two missing scores are equal.
    pub fn is_better_opt(a: Option<&Score>, b: Option<&Score>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a.is_better(b),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.priority, self.resource, self.waiting, self.implementation
        )
    }
}
