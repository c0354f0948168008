//! Pool scaler: decides when the resource pool should grow or shrink.
//!
//! The scaler reads a [`PoolLoad`] sample from the scheduler, compares the
//! queued work against the pool size, and emits scaling decisions. The
//! actual provisioning is performed by a callback to the scheduler.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::provisioning::BoxFuture;

/// A scaling decision for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Provision this many new workers.
    Grow(u32),
    /// Stop the named worker.
    Shrink(String),
    /// No change needed.
    NoChange,
}

/// Callback type for performing scaling actions.
pub type ScaleCallback = Box<dyn Fn(ScaleDecision) -> BoxFuture<()> + Send + Sync>;

/// What the scheduler currently looks like.
#[derive(Debug, Clone, Default)]
pub struct PoolLoad {
    /// Workers accepting actions.
    pub workers: u32,
    /// Workers whose start action has not finished yet.
    pub pending_starts: u32,
    /// Actions queued on a worker because its capacity is exhausted.
    pub waiting_actions: usize,
    /// Actions with no compatible worker at all.
    pub unassigned_actions: usize,
    /// Workers hosting nothing and with nothing queued.
    pub idle_workers: Vec<String>,
}

impl PoolLoad {
    fn pressure(&self) -> usize {
        self.waiting_actions + self.unassigned_actions
    }
}

#[derive(Debug, Clone)]
pub struct ScalePolicy {
    pub min_workers: u32,
    /// Zero disables growth beyond `min_workers`.
    pub max_workers: u32,
    /// Queued actions one new worker is expected to absorb.
    pub actions_per_worker: u32,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            min_workers: 0,
            max_workers: 0,
            actions_per_worker: 4,
            scale_up_cooldown: Duration::from_secs(60),
            scale_down_cooldown: Duration::from_secs(300),
        }
    }
}

pub struct PoolScaler {
    policy: ScalePolicy,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    scale_fn: Option<ScaleCallback>,
}

impl PoolScaler {
    pub fn new(policy: ScalePolicy) -> Self {
        Self {
            policy,
            last_scale_up: None,
            last_scale_down: None,
            scale_fn: None,
        }
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    pub fn policy(&self) -> &ScalePolicy {
        &self.policy
    }

    fn cooled_down(last: Option<Instant>, window: Duration, now: Instant) -> bool {
        last.is_none_or(|t| now.duration_since(t) >= window)
    }

    /// Evaluate the pool at instant `now`.
    pub fn evaluate(&mut self, load: &PoolLoad, now: Instant) -> ScaleDecision {
        let current = load.workers + load.pending_starts;

        // Below the floor: grow regardless of cooldown.
        if current < self.policy.min_workers {
            self.last_scale_up = Some(now);
            let missing = self.policy.min_workers - current;
            debug!(current, min = self.policy.min_workers, "pool below minimum");
            return ScaleDecision::Grow(missing);
        }

        let pressure = load.pressure();
        let max = self.policy.max_workers.max(self.policy.min_workers);

        if pressure > 0
            && current < max
            && Self::cooled_down(self.last_scale_up, self.policy.scale_up_cooldown, now)
        {
            let per_worker = self.policy.actions_per_worker.max(1) as usize;
            let wanted = pressure.div_ceil(per_worker) as u32;
            let grow = wanted.min(max - current);
            if grow > 0 {
                self.last_scale_up = Some(now);
                debug!(from = current, grow, pressure, "scaling up");
                return ScaleDecision::Grow(grow);
            }
        }

        if pressure == 0
            && load.workers > self.policy.min_workers
            && Self::cooled_down(self.last_scale_down, self.policy.scale_down_cooldown, now)
            && let Some(idle) = load.idle_workers.first()
        {
            self.last_scale_down = Some(now);
            debug!(worker = %idle, from = load.workers, "scaling down");
            return ScaleDecision::Shrink(idle.clone());
        }

        ScaleDecision::NoChange
    }

    /// Evaluate once and apply the decision through the callback.
    pub async fn evaluate_and_apply(&mut self, load: &PoolLoad) -> ScaleDecision {
        let decision = self.evaluate(load, Instant::now());
        if decision != ScaleDecision::NoChange
            && let Some(ref scale_fn) = self.scale_fn
            && let Err(e) = scale_fn(decision.clone()).await
        {
            warn!(?decision, error = %e, "scaling action failed");
        }
        decision
    }

    /// Run the scaler loop, sampling the pool with `sample`.
    pub async fn run<P>(
        &mut self,
        interval: Duration,
        sample: P,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) where
        P: Fn() -> PoolLoad + Send + Sync,
    {
        info!(interval_secs = interval.as_secs(), "pool scaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let load = sample();
                    self.evaluate_and_apply(&load).await;
                }
                _ = shutdown.changed() => {
                    info!("pool scaler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn policy(min: u32, max: u32) -> ScalePolicy {
        ScalePolicy {
            min_workers: min,
            max_workers: max,
            actions_per_worker: 4,
            // No cooldown for most tests.
            scale_up_cooldown: Duration::ZERO,
            scale_down_cooldown: Duration::ZERO,
        }
    }

    fn load(workers: u32, waiting: usize) -> PoolLoad {
        PoolLoad {
            workers,
            waiting_actions: waiting,
            ..Default::default()
        }
    }

    #[test]
    fn grows_to_minimum() {
        let mut scaler = PoolScaler::new(policy(2, 5));
        assert_eq!(scaler.evaluate(&load(0, 0), Instant::now()), ScaleDecision::Grow(2));
    }

    #[test]
    fn pending_starts_count_towards_minimum() {
        let mut scaler = PoolScaler::new(policy(2, 5));
        let l = PoolLoad {
            workers: 1,
            pending_starts: 1,
            ..Default::default()
        };
        assert_eq!(scaler.evaluate(&l, Instant::now()), ScaleDecision::NoChange);
    }

    #[test]
    fn grows_with_pressure_up_to_max() {
        let mut scaler = PoolScaler::new(policy(1, 3));
        // 9 queued actions, 4 per worker -> 3 wanted, only 2 allowed.
        assert_eq!(scaler.evaluate(&load(1, 9), Instant::now()), ScaleDecision::Grow(2));
    }

    #[test]
    fn unassigned_actions_create_pressure() {
        let mut scaler = PoolScaler::new(policy(0, 4));
        let l = PoolLoad {
            workers: 1,
            unassigned_actions: 1,
            ..Default::default()
        };
        assert_eq!(scaler.evaluate(&l, Instant::now()), ScaleDecision::Grow(1));
    }

    #[test]
    fn no_growth_at_max() {
        let mut scaler = PoolScaler::new(policy(1, 2));
        assert_eq!(scaler.evaluate(&load(2, 50), Instant::now()), ScaleDecision::NoChange);
    }

    #[test]
    fn shrinks_idle_worker_above_minimum() {
        let mut scaler = PoolScaler::new(policy(1, 4));
        let l = PoolLoad {
            workers: 2,
            idle_workers: vec!["w2".into()],
            ..Default::default()
        };
        assert_eq!(
            scaler.evaluate(&l, Instant::now()),
            ScaleDecision::Shrink("w2".into())
        );
    }

    #[test]
    fn never_shrinks_below_minimum() {
        let mut scaler = PoolScaler::new(policy(2, 4));
        let l = PoolLoad {
            workers: 2,
            idle_workers: vec!["w2".into()],
            ..Default::default()
        };
        assert_eq!(scaler.evaluate(&l, Instant::now()), ScaleDecision::NoChange);
    }

    #[test]
    fn scale_up_cooldown_is_respected() {
        let mut p = policy(0, 10);
        p.scale_up_cooldown = Duration::from_secs(60);
        let mut scaler = PoolScaler::new(p);
        let t0 = Instant::now();
        assert_eq!(scaler.evaluate(&load(1, 4), t0), ScaleDecision::Grow(1));
        assert_eq!(
            scaler.evaluate(&load(2, 4), t0 + Duration::from_secs(10)),
            ScaleDecision::NoChange
        );
        assert_eq!(
            scaler.evaluate(&load(2, 4), t0 + Duration::from_secs(61)),
            ScaleDecision::Grow(1)
        );
    }

    #[tokio::test]
    async fn callback_receives_decision() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let mut scaler = PoolScaler::new(policy(1, 3)).with_scale_fn(Box::new(move |d| {
            s.lock().unwrap().push(d);
            Box::pin(async { Ok(()) })
        }));

        scaler.evaluate_and_apply(&load(0, 0)).await;
        scaler.evaluate_and_apply(&load(3, 0)).await;
        assert_eq!(*seen.lock().unwrap(), vec![ScaleDecision::Grow(1)]);
    }
}
