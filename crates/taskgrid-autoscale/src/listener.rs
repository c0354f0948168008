//! Operation listener: rendezvous for a batch of async operations.
//!
//! Register operations with [`OperationListener::add_operation`], call
//! [`OperationListener::enable`] once every operation is registered, and
//! await [`OperationListener::wait`]. Waiters are released when the
//! listener is enabled and the outstanding count reaches zero. The first
//! failure reported is the one returned.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

#[derive(Default)]
struct Counters {
    pending: usize,
    enabled: bool,
    error: Option<String>,
}

pub struct OperationListener {
    counters: Mutex<Counters>,
    done: watch::Sender<bool>,
}

impl Default for OperationListener {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationListener {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            counters: Mutex::new(Counters::default()),
            done,
        }
    }

    pub fn add_operation(&self) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        c.pending += 1;
    }

    pub fn notify_end(&self) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        c.pending = c.pending.saturating_sub(1);
        self.check(&c);
    }

    pub fn notify_failure(&self, error: impl Into<String>) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        c.pending = c.pending.saturating_sub(1);
        if c.error.is_none() {
            c.error = Some(error.into());
        }
        self.check(&c);
    }

    /// No more operations will be added.
    pub fn enable(&self) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        c.enabled = true;
        self.check(&c);
    }

    pub fn pending(&self) -> usize {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).pending
    }

    fn check(&self, c: &Counters) {
        if c.enabled && c.pending == 0 {
            self.done.send_replace(true);
        }
    }

    /// Wait until every registered operation ended.
    pub async fn wait(&self) -> Result<(), String> {
        let mut rx = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
        let c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        match &c.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
