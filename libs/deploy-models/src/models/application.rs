//! Application records and intake requests

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strategy used to turn a source tree into a runnable image
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildPack {
    #[default]
    Dockerfile,
    DockerCompose,
    Static,
    /// A value this version does not know how to build. Kept so that the
    /// pipeline, not the intake path, rejects it.
    Unknown(String),
}

impl BuildPack {
    pub fn as_str(&self) -> &str {
        match self {
            BuildPack::Dockerfile => "dockerfile",
            BuildPack::DockerCompose => "docker-compose",
            BuildPack::Static => "static",
            BuildPack::Unknown(value) => value,
        }
    }
}

impl fmt::Display for BuildPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BuildPack {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dockerfile" => BuildPack::Dockerfile,
            "docker-compose" | "compose" => BuildPack::DockerCompose,
            "static" => BuildPack::Static,
            _ => BuildPack::Unknown(s.to_string()),
        }
    }
}

impl Serialize for BuildPack {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BuildPack {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(BuildPack::from(s.as_str()))
    }
}

/// A logical deployable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    /// Free-form environment label (e.g. "production")
    #[serde(default)]
    pub environment: String,
    /// Encoded `key=value` pairs passed to the image build
    #[serde(default)]
    pub build_variables: String,
    /// Encoded `key=value` pairs injected into the container
    #[serde(default)]
    pub environment_variables: String,
    pub build_pack: BuildPack,
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub pre_run_command: String,
    #[serde(default)]
    pub post_run_command: String,
    /// Port the application listens on inside the container
    pub port: u16,
    #[serde(default)]
    pub domain: String,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    #[serde(default)]
    pub dockerfile_path: String,
    #[serde(default)]
    pub base_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a new application deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub build_pack: BuildPack,
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub port: u16,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub build_variables: HashMap<String, String>,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    #[serde(default)]
    pub pre_run_command: String,
    #[serde(default)]
    pub post_run_command: String,
    #[serde(default = "default_dockerfile_path")]
    pub dockerfile_path: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_dockerfile_path() -> String {
    "Dockerfile".to_string()
}

fn default_base_path() -> String {
    "/".to_string()
}

/// Request body for redeploying an existing application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedeployRequest {
    pub application_id: Uuid,
    /// Pull base images again
    #[serde(default)]
    pub force: bool,
    /// Build without the layer cache
    #[serde(default)]
    pub force_without_cache: bool,
    /// Deploy this commit instead of the branch head
    #[serde(default)]
    pub commit_hash: Option<String>,
}
