//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, RemoteOptions};
use crate::deploy::atomic::AtomicUpdater;
use crate::deploy::builder::DockerfileBuilder;
use crate::deploy::engine::DockerCliEngine;
use crate::deploy::ports::RemotePortAllocator;
use crate::deploy::tracker::LogBroadcaster;
use crate::errors::DeployError;
use crate::orchestrator::{self, DeployService, Pipeline, PipelineDeps};
use crate::queue::{FileBackend, MemoryBackend, QueueBackend, QueueFactory};
use crate::remote::local::LocalShell;
use crate::remote::ssh::SshShell;
use crate::remote::RemoteTarget;
use crate::repository::{DeployRepository, JsonFileRepository, MemoryRepository};
use crate::source::git::RemoteGitClient;
use crate::source::hosting::HostingApi;
use crate::storage::settings::{QueueBackendKind, StorageBackend};

/// Main application state
pub struct AppState {
    /// Queue registry and consumers
    pub queues: Arc<QueueFactory>,

    /// Deployment intake and queries
    pub service: DeployService,
}

impl AppState {
    /// Build the store, queue, remote target and pipeline. Consumers are not
    /// started.
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;

        let repository: Arc<dyn DeployRepository> = match options.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryRepository::new()),
            StorageBackend::Json => {
                let repository = JsonFileRepository::new(layout.data_dir());
                repository.setup().await?;
                Arc::new(repository)
            }
        };

        let backend: Arc<dyn QueueBackend> = match options.queue.backend {
            QueueBackendKind::Memory => Arc::new(MemoryBackend::new()),
            QueueBackendKind::File => Arc::new(FileBackend::new(layout.queue_dir())),
        };
        let queues = Arc::new(QueueFactory::new(backend));

        let target: Arc<dyn RemoteTarget> = match &options.remote {
            RemoteOptions::Local { command_timeout } => Arc::new(LocalShell::new(*command_timeout)),
            RemoteOptions::Ssh(ssh) => Arc::new(SshShell::new(ssh.clone())),
        };
        info!("Deployment target: {}", target.name());

        let hosting = HostingApi::new(&options.github_api_base_url)?;
        let logs = LogBroadcaster::default();
        let pipeline = Pipeline::new(
            PipelineDeps {
                repository: repository.clone(),
                logs: logs.clone(),
                git: Arc::new(RemoteGitClient::new(target.clone(), hosting)),
                builder: Arc::new(DockerfileBuilder::new(target.clone(), options.build_timeout)),
                updater: AtomicUpdater::new(
                    Arc::new(DockerCliEngine::new(target.clone())),
                    Arc::new(RemotePortAllocator::new(
                        target.clone(),
                        options.port_range.clone(),
                    )),
                    options.update.clone(),
                ),
                target,
            },
            options.pipeline.clone(),
        );

        let service = orchestrator::register(
            &queues,
            options.queue.options.clone(),
            Arc::new(pipeline),
            repository,
            logs,
        )?;

        Ok(Self { queues, service })
    }

    /// Stop taking work and drain in-flight deployments
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.queues.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::app::options::{QueueConfig, StorageOptions};
    use crate::queue::{QueueOptions, TaskContext};
    use crate::orchestrator::DEPLOYMENT_QUEUE;
    use crate::storage::layout::StorageLayout;

    #[tokio::test]
    async fn test_init_with_file_backends() {
        let dir = tempfile::tempdir().unwrap();
        let options = AppOptions {
            storage: StorageOptions {
                layout: StorageLayout::new(dir.path()),
                backend: StorageBackend::Json,
            },
            ..Default::default()
        };

        let state = AppState::init(&options).await.unwrap();

        assert!(dir.path().join("data").join("applications").exists());
        assert!(state.queues.queue(DEPLOYMENT_QUEUE).is_some());
        state.shutdown().await.unwrap();
        assert!(state.queues.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_handler() {
        let dir = tempfile::tempdir().unwrap();
        let options = AppOptions {
            storage: StorageOptions {
                layout: StorageLayout::new(dir.path()),
                backend: StorageBackend::Memory,
            },
            queue: QueueConfig {
                backend: QueueBackendKind::Memory,
                ..Default::default()
            },
            ..Default::default()
        };
        let state = AppState::init(&options).await.unwrap();

        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let queue = state
            .queues
            .register_queue(QueueOptions {
                wait_timeout: Duration::from_millis(10),
                ..QueueOptions::new("builds")
            })
            .unwrap();
        let task = {
            let (started, finished) = (started.clone(), finished.clone());
            state.queues.register_task("build", 1, move |_ctx: TaskContext, _: String| {
                let (started, finished) = (started.clone(), finished.clone());
                async move {
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        state.queues.start_consumers().unwrap();
        queue.enqueue(&task, &"web".to_string()).await.unwrap();
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        state.shutdown().await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
    }
}
