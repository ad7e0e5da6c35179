//! Image builds

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::variables::{env_list, masked_env_list};
use crate::errors::DeployError;
use crate::remote::{quote, run_once, RemoteCommand, RemoteTarget};

/// Cache behaviour of a build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Pull base images again
    pub force: bool,
    /// Ignore the layer cache
    pub force_without_cache: bool,
}

/// A build of one image from a checked out source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub context_path: String,
    /// Dockerfile path relative to the context
    pub dockerfile: String,
    pub image_name: String,
    pub build_args: HashMap<String, String>,
    pub options: BuildOptions,
}

impl BuildRequest {
    pub fn dockerfile_path(&self) -> String {
        join_path(&self.context_path, &self.dockerfile)
    }

    /// Tag the built image gets
    pub fn image_ref(&self) -> String {
        format!("{}:latest", self.image_name)
    }
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Verify the build inputs exist before the build stage starts
    async fn check_context(&self, request: &BuildRequest) -> Result<(), DeployError>;

    /// Build the image and return its reference
    async fn build(&self, request: &BuildRequest) -> Result<String, DeployError>;
}

/// Runs `docker build` on the remote target
pub struct DockerfileBuilder {
    target: Arc<dyn RemoteTarget>,
    timeout: Duration,
}

impl DockerfileBuilder {
    pub fn new(target: Arc<dyn RemoteTarget>, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

fn build_command(request: &BuildRequest) -> (String, String) {
    let mut head = vec![
        "docker build".to_string(),
        format!("-f {}", quote(&request.dockerfile_path())),
        format!("-t {}", quote(&request.image_ref())),
    ];
    if request.options.force {
        head.push("--pull".to_string());
    }
    if request.options.force_without_cache {
        head.push("--no-cache".to_string());
    }

    let build_args = |entries: Vec<String>| -> Vec<String> {
        entries
            .iter()
            .map(|entry| format!("--build-arg {}", quote(entry)))
            .collect()
    };
    let tail = vec![quote(&request.context_path)];

    let script = [
        head.clone(),
        build_args(env_list(&request.build_args)),
        tail.clone(),
    ]
    .concat()
    .join(" ");
    let summary = [head, build_args(masked_env_list(&request.build_args)), tail]
        .concat()
        .join(" ");
    (script, summary)
}

/// Last lines of build output, enough to explain a failure
fn output_tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[async_trait]
impl ImageBuilder for DockerfileBuilder {
    async fn check_context(&self, request: &BuildRequest) -> Result<(), DeployError> {
        let dockerfile = request.dockerfile_path();
        let command = RemoteCommand::new(format!("test -f {}", quote(&dockerfile)));
        let output = run_once(self.target.as_ref(), &command).await?;
        if !output.success() {
            return Err(DeployError::BuildError(format!(
                "Dockerfile not found at {}",
                dockerfile
            )));
        }
        Ok(())
    }

    async fn build(&self, request: &BuildRequest) -> Result<String, DeployError> {
        let (script, summary) = build_command(request);
        info!(image = %request.image_ref(), "Building image");

        let command = RemoteCommand::new(script)
            .with_summary(summary)
            .with_timeout(self.timeout);
        let output = run_once(self.target.as_ref(), &command).await?;
        if !output.success() {
            return Err(DeployError::BuildError(output_tail(&output.combined(), 20)));
        }
        Ok(request.image_ref())
    }
}

/// Lowercase image name limited to `[a-z0-9._-]`
pub fn image_name(application_name: &str) -> Result<String, DeployError> {
    let mut name = String::with_capacity(application_name.len());
    for c in application_name.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name
        .trim_matches(|c: char| matches!(c, '.' | '_' | '-'))
        .to_string();
    if name.is_empty() {
        return Err(DeployError::MissingImageName);
    }
    Ok(name)
}

/// Join a relative path onto a base the way the remote shell will see it
pub fn join_path(base: &str, relative: &str) -> String {
    let relative = relative.trim().trim_start_matches("./").trim_start_matches('/');
    let base = base.trim_end_matches('/');
    if relative.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{}/{}", base, relative)
    }
}
