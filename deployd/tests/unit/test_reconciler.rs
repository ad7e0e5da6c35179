//! Reconciler worker tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deployd::errors::DeployError;
use deployd::workers::reconciler::{run, Options, StaleRequeuer};
use tokio::sync::oneshot;

#[derive(Default)]
struct CountingRequeuer {
    sweeps: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl StaleRequeuer for CountingRequeuer {
    async fn requeue_stale(&self, stale_after: Duration) -> Result<usize, DeployError> {
        assert_eq!(stale_after, Duration::from_secs(42));
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DeployError::StorageError("disk full".to_string()));
        }
        Ok(1)
    }
}

async fn sweep_until(requeuer: Arc<CountingRequeuer>, sweeps: usize) {
    let options = Options {
        interval: Duration::from_millis(1),
        stale_after: Duration::from_secs(42),
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let worker = {
        let requeuer = requeuer.clone();
        tokio::spawn(async move {
            run(
                &options,
                requeuer.as_ref(),
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = shutdown_rx.await;
                }),
            )
            .await;
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while requeuer.sweeps.load(Ordering::SeqCst) < sweeps {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_reconciler_sweeps_until_shutdown() {
    let requeuer = Arc::new(CountingRequeuer::default());
    sweep_until(requeuer.clone(), 3).await;
    assert!(requeuer.sweeps.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_reconciler_survives_failed_sweeps() {
    let requeuer = Arc::new(CountingRequeuer {
        fail: true,
        ..Default::default()
    });
    sweep_until(requeuer.clone(), 2).await;
    assert!(requeuer.sweeps.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_reconciler_stops_before_first_sweep() {
    let requeuer = CountingRequeuer::default();
    let options = Options {
        interval: Duration::from_secs(3600),
        ..Default::default()
    };

    run(&options, &requeuer, tokio::time::sleep, Box::pin(async {})).await;
    assert_eq!(requeuer.sweeps.load(Ordering::SeqCst), 0);
}
