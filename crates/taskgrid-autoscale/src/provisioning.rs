//! Provisioning seam and the bounded pool that drives it.
//!
//! The [`Provisioner`] is whatever actually creates, destroys and resizes
//! workers (a cloud connector, a batch system, a test double). Its futures
//! run on a [`ProvisioningPool`]: a tokio runtime handle plus a semaphore
//! bounding how many provisioning operations are in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use taskgrid_core::{ResourceDescription, WorkerDescription};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::listener::OperationListener;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// Creates, destroys and resizes workers.
pub trait Provisioner: Send + Sync + 'static {
    fn start_worker(&self, worker: &WorkerDescription) -> BoxFuture<()>;

    fn stop_worker(&self, worker: &str) -> BoxFuture<()>;

    fn reduce_worker(&self, worker: &str, reduction: &ResourceDescription) -> BoxFuture<()>;

    /// Data values whose only replica lives on `worker`.
    fn unique_data(&self, _worker: &str) -> Vec<String> {
        Vec::new()
    }

    /// Copy one data value off `worker` before it goes away.
    fn save_data(&self, _worker: &str, _data: &str) -> BoxFuture<()> {
        Box::pin(async { Ok(()) })
    }
}

/// Bounded executor for provisioning futures.
#[derive(Clone)]
pub struct ProvisioningPool {
    handle: Handle,
    permits: Arc<Semaphore>,
}

impl ProvisioningPool {
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Pool on the current tokio runtime. Panics outside a runtime, like
    /// `Handle::current`.
    pub fn current(max_concurrent: usize) -> Self {
        Self::new(Handle::current(), max_concurrent)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `fut` once a permit is free. Callable from any thread.
    pub fn spawn<F>(&self, label: &'static str, fut: F) -> JoinHandle<anyhow::Result<()>>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| anyhow::anyhow!("provisioning pool closed: {e}"))?;
            debug!(label, "provisioning operation started");
            fut.await
        })
    }
}

/// Save every unique data value off `worker`, then stop it.
///
/// Saving is best effort: a failed transfer is logged and the stop still
/// goes ahead.
pub async fn drain_and_stop(provisioner: Arc<dyn Provisioner>, worker: String) -> anyhow::Result<()> {
    let listener = Arc::new(OperationListener::new());
    let data = provisioner.unique_data(&worker);
    for value in &data {
        listener.add_operation();
        let l = listener.clone();
        let fut = provisioner.save_data(&worker, value);
        tokio::spawn(async move {
            match fut.await {
                Ok(()) => l.notify_end(),
                Err(e) => l.notify_failure(e.to_string()),
            }
        });
    }
    listener.enable();
    if let Err(e) = listener.wait().await {
        warn!(%worker, error = %e, "could not save every unique data value");
    } else if !data.is_empty() {
        info!(%worker, count = data.len(), "unique data saved");
    }
    provisioner.stop_worker(&worker).await
}
