//! Execution profiles.
//!
//! A [`Profile`] summarizes how long an implementation took on a worker.
//! Profiles are merged with a weighted average and keep true minimum and
//! maximum times across merges. The JSON form uses the keys `executions`,
//! `minTime`, `avgTime` and `maxTime`.

use std::time::Instant;

/// Estimate (ms) used for an implementation that never ran.
pub const DEFAULT_EXECUTION_TIME: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    executions: u64,
    min_time: u64,
    avg_time: u64,
    max_time: u64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            executions: 0,
            min_time: u64::MAX,
            avg_time: DEFAULT_EXECUTION_TIME,
            max_time: 0,
        }
    }
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile of a single execution that lasted `elapsed_ms`.
    pub fn single(elapsed_ms: u64) -> Self {
        Self {
            executions: 1,
            min_time: elapsed_ms,
            avg_time: elapsed_ms,
            max_time: elapsed_ms,
        }
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn min_time(&self) -> u64 {
        self.min_time
    }

    pub fn average_time(&self) -> u64 {
        self.avg_time
    }

    pub fn max_time(&self) -> u64 {
        self.max_time
    }

    /// Merge `other` into `self`.
    pub fn accumulate(&mut self, other: &Profile) {
        if other.executions == 0 {
            return;
        }
        if self.executions == 0 {
            *self = *other;
            return;
        }
        let total = self.executions + other.executions;
        let weighted =
            self.avg_time as u128 * self.executions as u128 + other.avg_time as u128 * other.executions as u128;
        self.avg_time = (weighted / total as u128) as u64;
        self.min_time = self.min_time.min(other.min_time);
        self.max_time = self.max_time.max(other.max_time);
        self.executions = total;
    }

    /// Record one more execution.
    pub fn record(&mut self, elapsed_ms: u64) {
        self.accumulate(&Profile::single(elapsed_ms));
    }
}

/// Timer for an execution in progress.
#[derive(Debug, Clone, Copy)]
pub struct RunProfile {
    started: Instant,
}

impl RunProfile {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
