//! Stale deployment sweep
//!
//! Re-enqueues deployments that were persisted but never picked up, for
//! instance because the enqueue after intake failed or the process died
//! before the message reached the queue.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::errors::DeployError;
use crate::orchestrator::DeployService;

/// Reconciler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Age after which a `Started` deployment counts as lost
    pub stale_after: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

#[async_trait]
pub trait StaleRequeuer: Send + Sync {
    async fn requeue_stale(&self, stale_after: Duration) -> Result<usize, DeployError>;
}

#[async_trait]
impl StaleRequeuer for DeployService {
    async fn requeue_stale(&self, stale_after: Duration) -> Result<usize, DeployError> {
        DeployService::requeue_stale(self, stale_after).await
    }
}

/// Run the reconciler worker
pub async fn run<R, S, F>(
    options: &Options,
    requeuer: &R,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    R: StaleRequeuer + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reconciler worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconciler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        debug!("Sweeping stale deployments...");
        match requeuer.requeue_stale(options.stale_after).await {
            Ok(0) => debug!("No stale deployments"),
            Ok(n) => info!("Re-enqueued {} stale deployments", n),
            Err(e) => error!("Stale deployment sweep failed: {}", e),
        }
    }
}
