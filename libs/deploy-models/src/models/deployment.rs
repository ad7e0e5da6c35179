//! Deployment attempts, status history and log lines

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Started,
    Cloning,
    Building,
    Deploying,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    /// Deployed and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    /// Position on the success path, `None` for Failed
    pub fn stage(&self) -> Option<u8> {
        match self {
            DeploymentStatus::Started => Some(0),
            DeploymentStatus::Cloning => Some(1),
            DeploymentStatus::Building => Some(2),
            DeploymentStatus::Deploying => Some(3),
            DeploymentStatus::Deployed => Some(4),
            DeploymentStatus::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Started => "started",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(DeploymentStatus::Started),
            "cloning" => Ok(DeploymentStatus::Cloning),
            "building" => Ok(DeploymentStatus::Building),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "deployed" => Ok(DeploymentStatus::Deployed),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// One deployment attempt of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDeployment {
    pub id: Uuid,
    pub application_id: Uuid,
    /// Filled after the repository is retrieved
    #[serde(default)]
    pub commit_hash: String,
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub container_image: String,
    #[serde(default)]
    pub container_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationDeployment {
    /// New attempt with empty container fields
    pub fn new(application_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            application_id,
            commit_hash: String::new(),
            container_id: String::new(),
            container_name: String::new(),
            container_image: String::new(),
            container_status: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A status history entry; the newest entry is the current status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDeploymentStatus {
    pub id: Uuid,
    pub application_deployment_id: Uuid,
    pub status: DeploymentStatus,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationDeploymentStatus {
    pub fn new(application_deployment_id: Uuid, status: DeploymentStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_deployment_id,
            status,
            updated_at: Utc::now(),
        }
    }
}

/// A deployment-scoped log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationLog {
    pub id: Uuid,
    pub application_id: Uuid,
    pub application_deployment_id: Uuid,
    pub log: String,
    pub created_at: DateTime<Utc>,
}

impl ApplicationLog {
    pub fn new(application_id: Uuid, application_deployment_id: Uuid, log: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            application_deployment_id,
            log: log.into(),
            created_at: Utc::now(),
        }
    }
}
