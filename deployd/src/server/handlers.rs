//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use deploy_models::models::{
    ApplicationDeployment, ApplicationDeploymentStatus, CreateDeploymentRequest,
    DeploymentStatus, RedeployRequest,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::errors::DeployError;
use crate::server::state::ServerState;
use crate::utils::version_info;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ORGANIZATION_ID_HEADER: &str = "x-organization-id";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        match &e {
            DeployError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
            e if e.is_validation() => api_error(StatusCode::BAD_REQUEST, e.to_string()),
            _ => {
                error!("Request failed: {}", e);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

/// Caller identity, set by whatever fronts this service
struct Caller {
    user_id: Uuid,
    organization_id: Uuid,
}

fn caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let header = |name: &str| -> Result<Uuid, ApiError> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| {
                api_error(
                    StatusCode::UNAUTHORIZED,
                    format!("missing or invalid {} header", name),
                )
            })
    };
    Ok(Caller {
        user_id: header(USER_ID_HEADER)?,
        organization_id: header(ORGANIZATION_ID_HEADER)?,
    })
}

/// Create an application and enqueue its first deployment
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller(&headers)?;
    let application = state
        .service
        .create_deployment(&request, caller.user_id, caller.organization_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(application)))
}

/// Enqueue a new deployment of an existing application
pub async fn redeploy_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<RedeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller(&headers)?;
    let deployment = state
        .service
        .redeploy(&request, caller.organization_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

/// Deployment with its status history
#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    #[serde(flatten)]
    pub deployment: ApplicationDeployment,
    pub status: Option<DeploymentStatus>,
    pub statuses: Vec<ApplicationDeploymentStatus>,
}

pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let (deployment, statuses) = state.service.get_deployment(id).await?;
    Ok(Json(DeploymentResponse {
        deployment,
        status: statuses.last().map(|row| row.status),
        statuses,
    }))
}

pub async fn deployment_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_logs(id).await?))
}
