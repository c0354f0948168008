//! Gap timeline of a single worker.
//!
//! The worker's future is a list of gaps ordered by start time. A gap is
//! free capacity that opens at `start` and stays open forever; its origin is
//! the action whose completion frees it, or `None` for capacity that is
//! free already.
//!
//! ```text
//! time ─────────────────────────────────────────────▶
//!   now          t1 (end of #4)     t2 (end of #7)
//!   [cpu=1]      [cpu=2, #4]        [cpu=1, #7]
//!
//! allocate(cpu=3): takes now/cpu=1, t1/cpu=2 -> start = t1, after #4
//! ```
//!
//! Allocation walks the gaps in order, consuming the units each gap has in
//! common with the outstanding requirement, until nothing is outstanding.
//! The placed action then contributes a new gap at its expected end.

use taskgrid_core::ResourceDescription;

use crate::action::ActionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub start: i64,
    pub origin: Option<ActionId>,
    pub available: ResourceDescription,
}

/// Result of placing a requirement on the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapAllocation {
    /// Earliest instant every requested unit is free.
    pub start: i64,
    /// Pending origins of the consumed gaps, in gap order.
    pub predecessors: Vec<ActionId>,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    gaps: Vec<Gap>,
}

impl Timeline {
    /// Timeline of a worker with `free` capacity available at `now`.
    pub fn new(now: i64, free: ResourceDescription) -> Self {
        let mut timeline = Self::default();
        timeline.insert(Gap {
            start: now,
            origin: None,
            available: free,
        });
        timeline
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    /// Insert after every gap starting at or before `gap.start`.
    pub fn insert(&mut self, gap: Gap) {
        if gap.available.is_empty() {
            return;
        }
        let at = self.gaps.partition_point(|g| g.start <= gap.start);
        self.gaps.insert(at, gap);
    }

    /// Start of the last gap: the instant the worker is expected to drain.
    pub fn latest_start(&self) -> i64 {
        self.gaps.last().map(|g| g.start).unwrap_or_default()
    }

    /// Consume `requirement` from the earliest gaps, starting no earlier
    /// than `ready_at`. Origins for which `is_pending` is false impose no
    /// ordering. Returns `None`, leaving the timeline untouched, when the
    /// gaps together cannot cover the requirement.
    pub fn allocate(
        &mut self,
        requirement: &ResourceDescription,
        ready_at: i64,
        mut is_pending: impl FnMut(ActionId) -> bool,
    ) -> Option<GapAllocation> {
        let mut allocation = GapAllocation {
            start: ready_at,
            predecessors: Vec::new(),
        };
        if requirement.is_empty() {
            return Some(allocation);
        }

        let mut gaps = self.gaps.clone();
        let mut pending = *requirement;
        for gap in gaps.iter_mut() {
            if !gap.available.overlaps(&pending) {
                continue;
            }
            gap.available.reduce_common(&mut pending);
            allocation.start = allocation.start.max(gap.start);
            if let Some(origin) = gap.origin
                && !allocation.predecessors.contains(&origin)
                && is_pending(origin)
            {
                allocation.predecessors.push(origin);
            }
            if pending.is_empty() {
                break;
            }
        }
        if !pending.is_empty() {
            return None;
        }

        gaps.retain(|g| !g.available.is_empty());
        self.gaps = gaps;
        Some(allocation)
    }
}
