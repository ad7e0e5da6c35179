//! Repository kept as JSON documents on disk
//!
//! ```text
//! <root>/applications/<id>.json
//! <root>/deployments/<id>.json
//! <root>/statuses/<deployment id>.jsonl
//! <root>/logs/<deployment id>.jsonl
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploy_models::models::{
    Application, ApplicationDeployment, ApplicationDeploymentStatus, ApplicationLog,
    DeploymentStatus,
};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{already_exists, not_found, DeployRepository};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// File-backed [`DeployRepository`]
pub struct JsonFileRepository {
    root: Dir,
    // serializes writers; readers only ever see whole documents
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(root: Dir) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    /// Create the directory tree
    pub async fn setup(&self) -> Result<(), DeployError> {
        for name in ["applications", "deployments", "statuses", "logs"] {
            self.root.subdir(name).create().await?;
        }
        Ok(())
    }

    fn application_file(&self, id: Uuid) -> File {
        self.root.subdir("applications").file(&format!("{}.json", id))
    }

    fn deployment_file(&self, id: Uuid) -> File {
        self.root.subdir("deployments").file(&format!("{}.json", id))
    }

    fn status_file(&self, deployment_id: Uuid) -> File {
        self.root
            .subdir("statuses")
            .file(&format!("{}.jsonl", deployment_id))
    }

    fn log_file(&self, deployment_id: Uuid) -> File {
        self.root
            .subdir("logs")
            .file(&format!("{}.jsonl", deployment_id))
    }
}

#[async_trait]
impl DeployRepository for JsonFileRepository {
    async fn add_application(&self, application: &Application) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.application_file(application.id);
        if file.exists().await {
            return Err(already_exists("application", application.id));
        }
        file.write_json(application).await
    }

    async fn update_application(&self, application: &Application) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.application_file(application.id);
        if !file.exists().await {
            return Err(not_found("application", application.id));
        }
        file.write_json(application).await
    }

    async fn get_application(&self, id: Uuid) -> Result<Application, DeployError> {
        let file = self.application_file(id);
        if !file.exists().await {
            return Err(not_found("application", id));
        }
        file.read_json().await
    }

    async fn add_deployment(&self, deployment: &ApplicationDeployment) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.deployment_file(deployment.id);
        if file.exists().await {
            return Err(already_exists("deployment", deployment.id));
        }
        file.write_json(deployment).await
    }

    async fn update_deployment(
        &self,
        deployment: &ApplicationDeployment,
    ) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.deployment_file(deployment.id);
        if !file.exists().await {
            return Err(not_found("deployment", deployment.id));
        }
        file.write_json(deployment).await
    }

    async fn get_deployment(&self, id: Uuid) -> Result<ApplicationDeployment, DeployError> {
        let file = self.deployment_file(id);
        if !file.exists().await {
            return Err(not_found("deployment", id));
        }
        file.read_json().await
    }

    async fn add_status(&self, status: &ApplicationDeploymentStatus) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        self.status_file(status.application_deployment_id)
            .append_json_line(status)
            .await
    }

    async fn list_statuses(
        &self,
        deployment_id: Uuid,
    ) -> Result<Vec<ApplicationDeploymentStatus>, DeployError> {
        self.status_file(deployment_id).read_json_lines().await
    }

    async fn add_log(&self, log: &ApplicationLog) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        self.log_file(log.application_deployment_id)
            .append_json_line(log)
            .await
    }

    async fn list_logs(&self, deployment_id: Uuid) -> Result<Vec<ApplicationLog>, DeployError> {
        self.log_file(deployment_id).read_json_lines().await
    }

    async fn list_deployments_with_status(
        &self,
        status: DeploymentStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<ApplicationDeployment>, DeployError> {
        let mut matching = Vec::new();
        for file in self.root.subdir("deployments").list_files("json").await? {
            let deployment: ApplicationDeployment = match file.read_json().await {
                Ok(deployment) => deployment,
                Err(e) => {
                    warn!("Skipping unreadable deployment {}: {}", file.path().display(), e);
                    continue;
                }
            };
            if deployment.created_at >= created_before {
                continue;
            }
            if self.current_status(deployment.id).await? == Some(status) {
                matching.push(deployment);
            }
        }
        matching.sort_by_key(|d| d.created_at);
        Ok(matching)
    }
}
