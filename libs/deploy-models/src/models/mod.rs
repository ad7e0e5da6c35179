//! Data models

pub mod application;
pub mod deployment;
pub mod task;

pub use application::{Application, BuildPack, CreateDeploymentRequest, RedeployRequest};
pub use deployment::{
    ApplicationDeployment, ApplicationDeploymentStatus, ApplicationLog, DeploymentStatus,
};
pub use task::{DeploymentKind, DeploymentOptions, TaskPayload};
