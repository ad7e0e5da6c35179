//! Process-local repository

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploy_models::models::{
    Application, ApplicationDeployment, ApplicationDeploymentStatus, ApplicationLog,
    DeploymentStatus,
};
use uuid::Uuid;

use super::{already_exists, not_found, DeployRepository};
use crate::errors::DeployError;

#[derive(Default)]
struct Tables {
    applications: HashMap<Uuid, Application>,
    deployments: HashMap<Uuid, ApplicationDeployment>,
    statuses: HashMap<Uuid, Vec<ApplicationDeploymentStatus>>,
    logs: HashMap<Uuid, Vec<ApplicationLog>>,
}

/// In-memory [`DeployRepository`]
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeployRepository for MemoryRepository {
    async fn add_application(&self, application: &Application) -> Result<(), DeployError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if tables.applications.contains_key(&application.id) {
            return Err(already_exists("application", application.id));
        }
        tables
            .applications
            .insert(application.id, application.clone());
        Ok(())
    }

    async fn update_application(&self, application: &Application) -> Result<(), DeployError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        match tables.applications.get_mut(&application.id) {
            Some(stored) => {
                *stored = application.clone();
                Ok(())
            }
            None => Err(not_found("application", application.id)),
        }
    }

    async fn get_application(&self, id: Uuid) -> Result<Application, DeployError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .applications
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("application", id))
    }

    async fn add_deployment(&self, deployment: &ApplicationDeployment) -> Result<(), DeployError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if tables.deployments.contains_key(&deployment.id) {
            return Err(already_exists("deployment", deployment.id));
        }
        tables.deployments.insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn update_deployment(
        &self,
        deployment: &ApplicationDeployment,
    ) -> Result<(), DeployError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        match tables.deployments.get_mut(&deployment.id) {
            Some(stored) => {
                *stored = deployment.clone();
                Ok(())
            }
            None => Err(not_found("deployment", deployment.id)),
        }
    }

    async fn get_deployment(&self, id: Uuid) -> Result<ApplicationDeployment, DeployError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .deployments
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("deployment", id))
    }

    async fn add_status(&self, status: &ApplicationDeploymentStatus) -> Result<(), DeployError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .statuses
            .entry(status.application_deployment_id)
            .or_default()
            .push(status.clone());
        Ok(())
    }

    async fn list_statuses(
        &self,
        deployment_id: Uuid,
    ) -> Result<Vec<ApplicationDeploymentStatus>, DeployError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .statuses
            .get(&deployment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_log(&self, log: &ApplicationLog) -> Result<(), DeployError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .logs
            .entry(log.application_deployment_id)
            .or_default()
            .push(log.clone());
        Ok(())
    }

    async fn list_logs(&self, deployment_id: Uuid) -> Result<Vec<ApplicationLog>, DeployError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.logs.get(&deployment_id).cloned().unwrap_or_default())
    }

    async fn list_deployments_with_status(
        &self,
        status: DeploymentStatus,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<ApplicationDeployment>, DeployError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<_> = tables
            .deployments
            .values()
            .filter(|d| d.created_at < created_before)
            .filter(|d| {
                tables
                    .statuses
                    .get(&d.id)
                    .and_then(|rows| rows.last())
                    .map(|row| row.status)
                    == Some(status)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|d| d.created_at);
        Ok(matching)
    }
}
