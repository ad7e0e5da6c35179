//! Deployment service
//!
//! Intake side of the orchestrator: persists the records for a request,
//! enqueues the task and answers read queries. Enqueue failures leave a
//! `Started` deployment behind that [`DeployService::requeue_stale`] picks
//! up later.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deploy_models::models::{
    Application, ApplicationDeployment, ApplicationDeploymentStatus, ApplicationLog,
    BuildPack, CreateDeploymentRequest, DeploymentKind, DeploymentOptions, DeploymentStatus,
    RedeployRequest, TaskPayload,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deploy::tracker::LogBroadcaster;
use crate::errors::DeployError;
use crate::orchestrator::context::{prepare_context, prepare_redeploy};
use crate::queue::{QueueHandle, TaskHandle};
use crate::repository::DeployRepository;

#[derive(Clone)]
pub struct DeployService {
    repository: Arc<dyn DeployRepository>,
    logs: LogBroadcaster,
    queue: QueueHandle,
    task: TaskHandle<TaskPayload>,
}

impl DeployService {
    pub fn new(
        repository: Arc<dyn DeployRepository>,
        logs: LogBroadcaster,
        queue: QueueHandle,
        task: TaskHandle<TaskPayload>,
    ) -> Self {
        Self {
            repository,
            logs,
            queue,
            task,
        }
    }

    /// Persist a new application with its first deployment and enqueue it.
    ///
    /// Returns once the task is queued, not when the deployment finishes.
    pub async fn create_deployment(
        &self,
        request: &CreateDeploymentRequest,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Application, DeployError> {
        let payload =
            prepare_context(self.repository.as_ref(), request, user_id, organization_id).await?;
        info!(
            application_id = %payload.application.id,
            deployment_id = %payload.application_deployment.id,
            "Created deployment for {}",
            payload.application.name
        );

        self.enqueue(&payload).await;
        Ok(payload.application)
    }

    /// Persist a new deployment of an existing application and enqueue it
    pub async fn redeploy(
        &self,
        request: &RedeployRequest,
        organization_id: Uuid,
    ) -> Result<ApplicationDeployment, DeployError> {
        let payload = prepare_redeploy(self.repository.as_ref(), request, organization_id).await?;
        info!(
            application_id = %payload.application.id,
            deployment_id = %payload.application_deployment.id,
            "Created redeployment for {}",
            payload.application.name
        );

        self.enqueue(&payload).await;
        Ok(payload.application_deployment)
    }

    /// Deployment record plus its status history, oldest first
    pub async fn get_deployment(
        &self,
        deployment_id: Uuid,
    ) -> Result<(ApplicationDeployment, Vec<ApplicationDeploymentStatus>), DeployError> {
        let deployment = self.repository.get_deployment(deployment_id).await?;
        let statuses = self.repository.list_statuses(deployment_id).await?;
        Ok((deployment, statuses))
    }

    pub async fn get_logs(&self, deployment_id: Uuid) -> Result<Vec<ApplicationLog>, DeployError> {
        // 404 for unknown deployments rather than an empty list
        self.repository.get_deployment(deployment_id).await?;
        self.repository.list_logs(deployment_id).await
    }

    /// Live deployment log lines from this point on
    pub fn subscribe_logs(&self) -> broadcast::Receiver<ApplicationLog> {
        self.logs.subscribe()
    }

    /// Enqueue again every deployment still `Started` after `stale_after`.
    /// Returns how many were enqueued.
    pub async fn requeue_stale(&self, stale_after: Duration) -> Result<usize, DeployError> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| DeployError::ConfigError(format!("invalid stale_after: {}", e)))?;
        let cutoff = Utc::now() - stale_after;

        let stale = self
            .repository
            .list_deployments_with_status(DeploymentStatus::Started, cutoff)
            .await?;

        let mut requeued = 0;
        for deployment in stale {
            let application = match self.repository.get_application(deployment.application_id).await {
                Ok(application) => application,
                Err(e) => {
                    warn!(deployment_id = %deployment.id, "Skipping stale deployment: {}", e);
                    continue;
                }
            };
            // these build packs finish without leaving Started
            if matches!(application.build_pack, BuildPack::DockerCompose | BuildPack::Static) {
                continue;
            }

            let payload = TaskPayload {
                status: Some(ApplicationDeploymentStatus::new(
                    deployment.id,
                    DeploymentStatus::Started,
                )),
                application,
                application_deployment: deployment,
                options: DeploymentOptions {
                    kind: DeploymentKind::Redeploy,
                    ..Default::default()
                },
            };
            if self.enqueue(&payload).await {
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    /// The deployment ID doubles as message ID so a payload is never queued
    /// twice
    async fn enqueue(&self, payload: &TaskPayload) -> bool {
        let deployment_id = payload.application_deployment.id;
        match self
            .queue
            .enqueue_with_id(&self.task, payload, Some(deployment_id.to_string()))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(%deployment_id, "Failed to enqueue deployment: {}", e);
                false
            }
        }
    }
}
