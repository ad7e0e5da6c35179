//! Task queue tests through the public API

use std::sync::{Arc, Mutex};
use std::time::Duration;

use deployd::errors::DeployError;
use deployd::filesys::dir::Dir;
use deployd::queue::{FileBackend, MemoryBackend, QueueFactory, QueueOptions, TaskHandle};
use serde::{Deserialize, Serialize};
use tokio_test::assert_ok;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Build {
    image: String,
}

fn options(name: &str) -> QueueOptions {
    QueueOptions {
        reservation_timeout: Duration::from_secs(5),
        wait_timeout: Duration::from_millis(10),
        ..QueueOptions::new(name)
    }
}

async fn wait_for(seen: &Arc<Mutex<Vec<Build>>>, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

fn register_recorder(factory: &QueueFactory, seen: Arc<Mutex<Vec<Build>>>) -> TaskHandle<Build> {
    factory.register_task("build", 1, move |_ctx, build: Build| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(build);
            Ok::<(), DeployError>(())
        }
    })
}

#[tokio::test]
async fn test_enqueued_tasks_are_handled() {
    let factory = QueueFactory::new(Arc::new(MemoryBackend::new()));
    let queue = factory.register_queue(options("builds")).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let task = register_recorder(&factory, seen.clone());
    assert_eq!(task.key(), "build@v1");

    factory.start_consumers().unwrap();
    for image in ["a", "b", "c"] {
        assert_ok!(queue.enqueue(&task, &Build { image: image.to_string() }).await);
    }

    wait_for(&seen, 3).await;
    factory.close().await;

    let mut images: Vec<_> = seen.lock().unwrap().iter().map(|b| b.image.clone()).collect();
    images.sort();
    assert_eq!(images, vec!["a", "b", "c"]);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_file_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    // first process: enqueue, never consume
    {
        let factory = QueueFactory::new(Arc::new(FileBackend::new(Dir::new(dir.path()))));
        let queue = factory.register_queue(options("builds")).unwrap();
        let task = factory.register_task("build", 1, |_ctx, _build: Build| async {
            Ok::<(), DeployError>(())
        });
        queue
            .enqueue_with_id(&task, &Build { image: "web".to_string() }, Some("dep-1".to_string()))
            .await
            .unwrap();
        factory.close().await;
    }

    // second process picks it up
    let factory = QueueFactory::new(Arc::new(FileBackend::new(Dir::new(dir.path()))));
    let queue = factory.register_queue(options("builds")).unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    register_recorder(&factory, seen.clone());
    factory.start_consumers().unwrap();

    wait_for(&seen, 1).await;
    factory.close().await;
    assert_eq!(seen.lock().unwrap()[0].image, "web");
}
