//! Deployment orchestration
//!
//! Wires request intake ([`DeployService`]) to the pipeline ([`Pipeline`])
//! through the `create-deployment` queue.

pub mod context;
pub mod pipeline;
pub mod service;

use std::sync::Arc;

use deploy_models::models::TaskPayload;

use crate::deploy::tracker::LogBroadcaster;
use crate::errors::DeployError;
use crate::queue::{QueueFactory, QueueOptions};
use crate::repository::DeployRepository;

pub use pipeline::{Pipeline, PipelineDeps, PipelineOptions};
pub use service::DeployService;

pub const DEPLOYMENT_QUEUE: &str = "create-deployment";
pub const DEPLOYMENT_TASK: &str = "create-deployment";
pub const DEPLOYMENT_TASK_VERSION: u32 = 1;

/// Register the deployment queue and task on `factory`. Consumers are not
/// started here.
pub fn register(
    factory: &QueueFactory,
    queue_options: QueueOptions,
    pipeline: Arc<Pipeline>,
    repository: Arc<dyn DeployRepository>,
    logs: LogBroadcaster,
) -> Result<DeployService, DeployError> {
    let queue = factory.register_queue(QueueOptions {
        name: DEPLOYMENT_QUEUE.to_string(),
        ..queue_options
    })?;

    let task = factory.register_task(
        DEPLOYMENT_TASK,
        DEPLOYMENT_TASK_VERSION,
        move |ctx, payload: TaskPayload| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(&ctx, payload).await }
        },
    );

    Ok(DeployService::new(repository, logs, queue, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use deploy_models::models::{
        CreateDeploymentRequest, DeploymentStatus, RedeployRequest,
    };
    use uuid::Uuid;

    use crate::deploy::atomic::{AtomicUpdater, UpdateOptions};
    use crate::deploy::builder::DockerfileBuilder;
    use crate::orchestrator::context::prepare_context;
    use crate::queue::MemoryBackend;
    use crate::repository::MemoryRepository;
    use crate::source::git::RemoteGitClient;
    use crate::source::hosting::{HostingApi, DEFAULT_API_BASE_URL};
    use crate::testing::{ok, FakeEngine, FakePorts, FakeTarget};

    struct Setup {
        engine: Arc<FakeEngine>,
        repo: Arc<MemoryRepository>,
        factory: QueueFactory,
        service: DeployService,
    }

    fn setup() -> Setup {
        let target = Arc::new(FakeTarget::new());
        target.respond("rev-parse HEAD", ok("abc123\n"));
        let engine = Arc::new(FakeEngine::new());
        let repo = Arc::new(MemoryRepository::new());
        let logs = LogBroadcaster::default();

        let pipeline = Pipeline::new(
            PipelineDeps {
                repository: repo.clone(),
                logs: logs.clone(),
                git: Arc::new(RemoteGitClient::new(
                    target.clone(),
                    HostingApi::new(DEFAULT_API_BASE_URL).unwrap(),
                )),
                builder: Arc::new(DockerfileBuilder::new(target.clone(), Duration::from_secs(60))),
                updater: AtomicUpdater::new(
                    engine.clone(),
                    Arc::new(FakePorts::new(Some(50200))),
                    UpdateOptions {
                        stabilize_delay: Duration::ZERO,
                        ..Default::default()
                    },
                ),
                target,
            },
            PipelineOptions::default(),
        );

        let factory = QueueFactory::new(Arc::new(MemoryBackend::new()));
        let options = QueueOptions {
            wait_timeout: Duration::from_millis(10),
            ..QueueOptions::new("ignored")
        };
        let service = register(&factory, options, Arc::new(pipeline), repo.clone(), logs).unwrap();

        Setup {
            engine,
            repo,
            factory,
            service,
        }
    }

    fn request() -> CreateDeploymentRequest {
        serde_json::from_value(serde_json::json!({
            "name": "Shop Frontend",
            "repository": "https://github.com/acme/shop",
            "port": 8080,
            "environment_variables": { "API_TOKEN": "tok-123" }
        }))
        .unwrap()
    }

    async fn wait_for_terminal(service: &DeployService, deployment_id: Uuid) -> Vec<DeploymentStatus> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (_, statuses) = service.get_deployment(deployment_id).await.unwrap();
                if statuses.last().is_some_and(|row| row.status.is_terminal()) {
                    return statuses.into_iter().map(|row| row.status).collect();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    async fn latest_deployment(repo: &MemoryRepository, application_id: Uuid) -> Uuid {
        repo.list_deployments_with_status(DeploymentStatus::Started, chrono::Utc::now())
            .await
            .unwrap()
            .into_iter()
            .rev()
            .find(|d| d.application_id == application_id)
            .map(|d| d.id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_deployment_runs_through_the_queue() {
        let s = setup();
        let mut live = s.service.subscribe_logs();

        let application = s
            .service
            .create_deployment(&request(), Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(application.name, "Shop Frontend");

        let deployment_id = latest_deployment(&s.repo, application.id).await;
        s.factory.start_consumers().unwrap();

        let statuses = wait_for_terminal(&s.service, deployment_id).await;
        assert_eq!(
            statuses,
            vec![
                DeploymentStatus::Started,
                DeploymentStatus::Cloning,
                DeploymentStatus::Building,
                DeploymentStatus::Deploying,
                DeploymentStatus::Deployed,
            ]
        );

        let (deployment, _) = s.service.get_deployment(deployment_id).await.unwrap();
        assert_eq!(deployment.container_status, "running");
        assert_eq!(deployment.container_image, "shop-frontend:latest");
        assert_eq!(s.engine.running_for(&application.id.to_string()).len(), 1);

        let logs = s.service.get_logs(deployment_id).await.unwrap();
        assert!(logs.iter().all(|l| !l.log.contains("tok-123")));
        assert_eq!(live.recv().await.unwrap().application_deployment_id, deployment_id);

        s.factory.close().await;
    }

    #[tokio::test]
    async fn test_redeploy_replaces_the_running_container() {
        let s = setup();
        s.factory.start_consumers().unwrap();
        let organization_id = Uuid::new_v4();

        let application = s
            .service
            .create_deployment(&request(), Uuid::new_v4(), organization_id)
            .await
            .unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(c) = s.engine.running_for(&application.id.to_string()).pop() {
                    return c;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let deployment = s
            .service
            .redeploy(
                &RedeployRequest {
                    application_id: application.id,
                    ..Default::default()
                },
                organization_id,
            )
            .await
            .unwrap();
        let statuses = wait_for_terminal(&s.service, deployment.id).await;
        assert_eq!(statuses.last(), Some(&DeploymentStatus::Deployed));

        let running = s.engine.running_for(&application.id.to_string());
        assert_eq!(running.len(), 1);
        assert_ne!(running[0].id, first.id);

        s.factory.close().await;
    }

    #[tokio::test]
    async fn test_redeploy_from_another_organization_is_not_found() {
        let s = setup();
        let application = s
            .service
            .create_deployment(&request(), Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let err = s
            .service
            .redeploy(
                &RedeployRequest {
                    application_id: application.id,
                    ..Default::default()
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_not_found() {
        let s = setup();
        assert!(matches!(
            s.service.get_logs(Uuid::new_v4()).await,
            Err(DeployError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_stale_started_deployments() {
        let s = setup();
        let queue = s.factory.queue(DEPLOYMENT_QUEUE).unwrap();

        // persisted but never enqueued
        prepare_context(s.repo.as_ref(), &request(), Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);

        assert_eq!(s.service.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(s.service.requeue_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(queue.len().await.unwrap(), 1);

        // same message ID, still one message
        s.service.requeue_stale(Duration::ZERO).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_still_returns_application() {
        let s = setup();
        s.factory.close().await;

        let application = s
            .service
            .create_deployment(&request(), Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        let deployment_id = latest_deployment(&s.repo, application.id).await;
        let (_, statuses) = s.service.get_deployment(deployment_id).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, DeploymentStatus::Started);
    }
}
