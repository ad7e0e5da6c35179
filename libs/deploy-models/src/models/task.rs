//! Queue payloads

use serde::{Deserialize, Serialize};

use crate::models::application::Application;
use crate::models::deployment::{ApplicationDeployment, ApplicationDeploymentStatus};

/// Whether the payload creates a fresh checkout or updates an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    #[default]
    Create,
    Redeploy,
}

/// Knobs for a single pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentOptions {
    #[serde(default)]
    pub kind: DeploymentKind,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub force_without_cache: bool,
    #[serde(default)]
    pub commit_hash: Option<String>,
}

/// Unit of work carried through the deployment queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub application: Application,
    pub application_deployment: ApplicationDeployment,
    /// Initial status snapshot
    #[serde(default)]
    pub status: Option<ApplicationDeploymentStatus>,
    #[serde(default)]
    pub options: DeploymentOptions,
}
