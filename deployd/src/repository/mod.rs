//! Persistent store for applications, deployments, statuses and logs
//!
//! Status history is append-only: every transition adds a row and the most
//! recent row is the current status.

pub mod json;
pub mod memory;

pub use json::JsonFileRepository;
pub use memory::MemoryRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploy_models::models::{
    Application, ApplicationDeployment, ApplicationDeploymentStatus, ApplicationLog,
    DeploymentStatus,
};
use uuid::Uuid;

use crate::errors::DeployError;

#[async_trait]
pub trait DeployRepository: Send + Sync {
    /// Fails with a storage error if the ID already exists
    async fn add_application(&self, application: &Application) -> Result<(), DeployError>;

    async fn update_application(&self, application: &Application) -> Result<(), DeployError>;

    async fn get_application(&self, id: Uuid) -> Result<Application, DeployError>;

    async fn add_deployment(&self, deployment: &ApplicationDeployment) -> Result<(), DeployError>;

    async fn update_deployment(
        &self,
        deployment: &ApplicationDeployment,
    ) -> Result<(), DeployError>;

    async fn get_deployment(&self, id: Uuid) -> Result<ApplicationDeployment, DeployError>;

    async fn add_status(&self, status: &ApplicationDeploymentStatus) -> Result<(), DeployError>;

    /// Oldest first
    async fn list_statuses(
        &self,
        deployment_id: Uuid,
    ) -> Result<Vec<ApplicationDeploymentStatus>, DeployError>;

    async fn add_log(&self, log: &ApplicationLog) -> Result<(), DeployError>;

    /// Oldest first
    async fn list_logs(&self, deployment_id: Uuid) -> Result<Vec<ApplicationLog>, DeployError>;

    /// Deployments whose current status is `status` and that were created
    /// before `created_before`
    async fn list_deployments_with_status(
        &self,
        status: DeploymentStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<ApplicationDeployment>, DeployError>;

    /// Latest status row, if any
    async fn current_status(
        &self,
        deployment_id: Uuid,
    ) -> Result<Option<DeploymentStatus>, DeployError> {
        Ok(self
            .list_statuses(deployment_id)
            .await?
            .last()
            .map(|row| row.status))
    }
}

fn not_found(kind: &str, id: Uuid) -> DeployError {
    DeployError::NotFound(format!("{} {}", kind, id))
}

fn already_exists(kind: &str, id: Uuid) -> DeployError {
    DeployError::StorageError(format!("{} {} already exists", kind, id))
}
