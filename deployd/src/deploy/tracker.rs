//! Deployment status and log tracking
//!
//! The tracker is the only writer of a deployment's status. Log lines are
//! persisted, mirrored to `tracing` and published to live subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use deploy_models::models::{ApplicationDeploymentStatus, ApplicationLog, DeploymentStatus};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, Transition};
use crate::errors::DeployError;
use crate::repository::DeployRepository;

/// Sink for progress lines emitted by long-running steps
#[async_trait]
pub trait StepLogger: Send + Sync {
    async fn step(&self, message: String);
}

/// Fan-out of deployment log lines to live viewers
#[derive(Clone)]
pub struct LogBroadcaster {
    sender: broadcast::Sender<ApplicationLog>,
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApplicationLog> {
        self.sender.subscribe()
    }

    /// Having no subscribers is not an error
    pub fn publish(&self, log: ApplicationLog) {
        let _ = self.sender.send(log);
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Tracks a single deployment
pub struct DeploymentTracker {
    repository: Arc<dyn DeployRepository>,
    logs: LogBroadcaster,
    application_id: Uuid,
    deployment_id: Uuid,
    fsm: Mutex<DeploymentFsm>,
}

impl DeploymentTracker {
    /// Resume tracking from the deployment's persisted status
    pub async fn resume(
        repository: Arc<dyn DeployRepository>,
        logs: LogBroadcaster,
        application_id: Uuid,
        deployment_id: Uuid,
    ) -> Result<Self, DeployError> {
        let current = repository
            .current_status(deployment_id)
            .await?
            .unwrap_or(DeploymentStatus::Started);
        Ok(Self {
            repository,
            logs,
            application_id,
            deployment_id,
            fsm: Mutex::new(DeploymentFsm::new(current)),
        })
    }

    pub fn deployment_id(&self) -> Uuid {
        self.deployment_id
    }

    pub async fn status(&self) -> DeploymentStatus {
        self.fsm.lock().await.status()
    }

    /// Append a log line
    pub async fn add_log(&self, message: impl Into<String>) -> Result<(), DeployError> {
        let log = ApplicationLog::new(self.application_id, self.deployment_id, message);
        info!(
            deployment_id = %self.deployment_id,
            application_id = %self.application_id,
            "{}",
            log.log
        );
        self.repository.add_log(&log).await?;
        self.logs.publish(log);
        Ok(())
    }

    /// Move to `status` and persist it. Reaching a status twice is a no-op.
    pub async fn update_status(&self, status: DeploymentStatus) -> Result<(), DeployError> {
        let mut fsm = self.fsm.lock().await;
        let from = fsm.status();
        match fsm.advance_to(status)? {
            Transition::Applied => {
                self.repository
                    .add_status(&ApplicationDeploymentStatus::new(self.deployment_id, status))
                    .await?;
                debug!(deployment_id = %self.deployment_id, "Status {} -> {}", from, status);
            }
            Transition::AlreadyReached => {
                debug!(deployment_id = %self.deployment_id, "Status {} already reached", status);
            }
        }
        Ok(())
    }

    /// Log first, then move to `status`
    pub async fn log_and_update_status(
        &self,
        message: impl Into<String>,
        status: DeploymentStatus,
    ) -> Result<(), DeployError> {
        self.add_log(message).await?;
        self.update_status(status).await
    }

    /// Record a failure: explanatory line, then `Failed`
    pub async fn fail(&self, message: impl Into<String>) -> Result<(), DeployError> {
        let message = message.into();
        self.add_log(message.clone()).await?;

        let mut fsm = self.fsm.lock().await;
        if fsm.process(DeploymentEvent::Fail(message))? == Transition::Applied {
            self.repository
                .add_status(&ApplicationDeploymentStatus::new(
                    self.deployment_id,
                    DeploymentStatus::Failed,
                ))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StepLogger for DeploymentTracker {
    async fn step(&self, message: String) {
        if let Err(e) = self.add_log(message).await {
            warn!(deployment_id = %self.deployment_id, "Failed to store deployment log: {}", e);
        }
    }
}
