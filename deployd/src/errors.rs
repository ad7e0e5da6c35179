//! Error types for deployd

use thiserror::Error;

/// Main error type for deployd
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A remote shell command failed; carries the attempted operation and
    /// whatever the command printed
    #[error("{operation} failed: {message}")]
    RemoteError { operation: String, message: String },

    /// The source hosting API answered with a non-success status
    #[error("API error: status {status}, body: {body}")]
    ApiError { status: u16, body: String },

    #[error("image name is required")]
    MissingImageName,

    #[error("invalid build pack: {0}")]
    InvalidBuildPack(String),

    #[error("invalid variable: {0}")]
    InvalidVariable(String),

    #[error("failed to list containers: {0}")]
    FailedToListContainers(String),

    #[error("failed to get available port: {0}")]
    FailedToGetAvailablePort(String),

    #[error("failed to create container: {0}")]
    FailedToCreateContainer(String),

    #[error("failed to start new container: {0}")]
    FailedToStartNewContainer(String),

    #[error("failed to update container: {0}")]
    FailedToUpdateContainer(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Hook error: {0}")]
    HookError(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Wrap a failed remote operation with its context
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::RemoteError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Configuration and validation errors that must fail before any side effect
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeployError::MissingImageName
                | DeployError::InvalidBuildPack(_)
                | DeployError::InvalidVariable(_)
        )
    }
}

impl From<tokio::task::JoinError> for DeployError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeployError::Internal(err.to_string())
    }
}
