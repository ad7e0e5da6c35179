//! Context preparation
//!
//! Materializes and persists the records a pipeline run works on. Nothing
//! here touches the deployment host.

use chrono::Utc;
use deploy_models::models::{
    Application, ApplicationDeployment, ApplicationDeploymentStatus, CreateDeploymentRequest,
    DeploymentKind, DeploymentOptions, DeploymentStatus, RedeployRequest, TaskPayload,
};
use tracing::error;
use uuid::Uuid;

use crate::deploy::variables;
use crate::errors::DeployError;
use crate::repository::DeployRepository;

/// Application record for a create request
pub fn application_from_request(
    request: &CreateDeploymentRequest,
    user_id: Uuid,
    organization_id: Uuid,
) -> Result<Application, DeployError> {
    let now = Utc::now();
    Ok(Application {
        id: Uuid::new_v4(),
        name: request.name.clone(),
        environment: request.environment.clone(),
        build_variables: variables::encode(&request.build_variables)?,
        environment_variables: variables::encode(&request.environment_variables)?,
        build_pack: request.build_pack.clone(),
        repository: request.repository.clone(),
        branch: request.branch.clone(),
        pre_run_command: request.pre_run_command.clone(),
        post_run_command: request.post_run_command.clone(),
        port: request.port,
        domain: request.domain.clone(),
        user_id,
        organization_id,
        dockerfile_path: request.dockerfile_path.clone(),
        base_path: request.base_path.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Persist application, deployment and the `Started` status for a new
/// application
pub async fn prepare_context(
    repository: &dyn DeployRepository,
    request: &CreateDeploymentRequest,
    user_id: Uuid,
    organization_id: Uuid,
) -> Result<TaskPayload, DeployError> {
    let application = application_from_request(request, user_id, organization_id)?;

    repository
        .add_application(&application)
        .await
        .inspect_err(|e| error!("Failed to create application record: {}", e))?;

    start_deployment(
        repository,
        application,
        DeploymentOptions {
            kind: DeploymentKind::Create,
            ..Default::default()
        },
    )
    .await
}

/// Persist a new deployment of an existing application
pub async fn prepare_redeploy(
    repository: &dyn DeployRepository,
    request: &RedeployRequest,
    organization_id: Uuid,
) -> Result<TaskPayload, DeployError> {
    let application = repository.get_application(request.application_id).await?;
    if application.organization_id != organization_id {
        return Err(DeployError::NotFound(format!(
            "application {}",
            request.application_id
        )));
    }

    start_deployment(
        repository,
        application,
        DeploymentOptions {
            kind: DeploymentKind::Redeploy,
            force: request.force,
            force_without_cache: request.force_without_cache,
            commit_hash: request
                .commit_hash
                .as_deref()
                .map(str::trim)
                .filter(|hash| !hash.is_empty())
                .map(str::to_string),
        },
    )
    .await
}

async fn start_deployment(
    repository: &dyn DeployRepository,
    application: Application,
    options: DeploymentOptions,
) -> Result<TaskPayload, DeployError> {
    let deployment = ApplicationDeployment::new(application.id);
    repository
        .add_deployment(&deployment)
        .await
        .inspect_err(|e| error!("Failed to create application deployment: {}", e))?;

    let status = ApplicationDeploymentStatus::new(deployment.id, DeploymentStatus::Started);
    repository
        .add_status(&status)
        .await
        .inspect_err(|e| error!("Failed to create deployment status: {}", e))?;

    Ok(TaskPayload {
        application,
        application_deployment: deployment,
        status: Some(status),
        options,
    })
}
