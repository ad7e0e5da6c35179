//! Deployment pipeline
//!
//! Dispatches a dequeued [`TaskPayload`] on its build pack and, for
//! Dockerfile applications, runs clone → pre-run hook → build → atomic
//! update → post-run hook. This is the only place that writes a terminal
//! status.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deploy_models::models::{
    Application, ApplicationDeployment, BuildPack, DeploymentKind, DeploymentOptions,
    DeploymentStatus, TaskPayload,
};
use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::deploy::atomic::AtomicUpdater;
use crate::deploy::builder::{image_name, join_path, BuildOptions, BuildRequest, ImageBuilder};
use crate::deploy::locks::AppLocks;
use crate::deploy::tracker::{DeploymentTracker, LogBroadcaster, StepLogger};
use crate::deploy::variables;
use crate::errors::DeployError;
use crate::queue::TaskContext;
use crate::remote::{quote, run_once, RemoteCommand, RemoteTarget};
use crate::repository::DeployRepository;
use crate::source::git::GitClient;
use crate::source::hosting::{authenticated_url, redact_url};

/// Pipeline options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Checkouts live at `<root>/<user id>/<application id>`
    pub repositories_root: String,
    /// Token for private HTTPS repositories and the hosting API
    pub github_token: Option<SecretString>,
    pub hook_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            repositories_root: "/var/lib/deployd/repositories".to_string(),
            github_token: None,
            hook_timeout: Duration::from_secs(600),
        }
    }
}

/// Collaborators of the pipeline
pub struct PipelineDeps {
    pub repository: Arc<dyn DeployRepository>,
    pub logs: LogBroadcaster,
    pub git: Arc<dyn GitClient>,
    pub builder: Arc<dyn ImageBuilder>,
    pub updater: AtomicUpdater,
    /// Where hooks run
    pub target: Arc<dyn RemoteTarget>,
}

pub struct Pipeline {
    deps: PipelineDeps,
    locks: AppLocks,
    options: PipelineOptions,
}

/// A failed stage: the stage's explanation plus the cause
struct StageFailure {
    stage: &'static str,
    error: DeployError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

trait Stage<T> {
    fn stage(self, stage: &'static str) -> Result<T, StageFailure>;
}

impl<T> Stage<T> for Result<T, DeployError> {
    fn stage(self, stage: &'static str) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, options: PipelineOptions) -> Self {
        Self {
            deps,
            locks: AppLocks::new(),
            options,
        }
    }

    /// Run a payload to a terminal status.
    ///
    /// Pipeline failures are recorded on the deployment and return `Ok` so
    /// the message is acknowledged. An `Err` means the failure could not be
    /// recorded and the message should be delivered again.
    pub async fn handle(&self, ctx: &TaskContext, payload: TaskPayload) -> Result<(), DeployError> {
        let application_id = payload.application.id;
        let deployment_id = payload.application_deployment.id;

        let _guard = self.locks.acquire(application_id).await;

        if let Some(status) = self.deps.repository.current_status(deployment_id).await? {
            if status.is_terminal() {
                info!(%deployment_id, "Deployment already {}, skipping", status);
                return Ok(());
            }
        }

        let tracker = DeploymentTracker::resume(
            self.deps.repository.clone(),
            self.deps.logs.clone(),
            application_id,
            deployment_id,
        )
        .await?;
        if ctx.attempt > 1 {
            tracker
                .add_log(format!("Resuming deployment (attempt {})", ctx.attempt))
                .await?;
        }

        let build_pack = payload.application.build_pack.clone();
        let result = match &build_pack {
            BuildPack::Dockerfile => self.run_dockerfile(&tracker, payload).await,
            BuildPack::DockerCompose | BuildPack::Static => {
                tracker
                    .add_log(format!(
                        "Build pack {} has no pipeline yet, nothing to do",
                        build_pack
                    ))
                    .await?;
                Ok(())
            }
            BuildPack::Unknown(value) => {
                Err::<(), _>(DeployError::InvalidBuildPack(value.clone())).stage("Deployment rejected")
            }
        };

        if let Err(failure) = result {
            error!(%deployment_id, %application_id, "Deployment failed: {}", failure);
            tracker.fail(failure.to_string()).await?;
        }
        Ok(())
    }

    async fn run_dockerfile(
        &self,
        tracker: &DeploymentTracker,
        payload: TaskPayload,
    ) -> Result<(), StageFailure> {
        let TaskPayload {
            application,
            application_deployment: mut deployment,
            options,
            ..
        } = payload;

        let repo_path = self.repository_path(&application);
        let request =
            build_request(&application, &repo_path, &options).stage("Invalid configuration")?;

        tracker
            .log_and_update_status("Starting deployment process", DeploymentStatus::Cloning)
            .await
            .stage("Failed to record status")?;

        self.checkout(tracker, &application, &options, &repo_path)
            .await
            .stage("Failed to clone repository")?;
        self.record_commit(tracker, &mut deployment, &repo_path)
            .await
            .stage("Failed to record commit")?;

        self.run_hook(tracker, "pre-run", &application.pre_run_command, &repo_path)
            .await
            .stage("Pre-run command failed")?;

        self.deps
            .builder
            .check_context(&request)
            .await
            .stage("Failed to build image")?;

        tracker.step(format!(
            "Building image from Dockerfile {} for application {}",
            request.dockerfile_path(),
            application.name
        ))
        .await;

        // Building is recorded only once the image exists
        let image = self
            .deps
            .builder
            .build(&request)
            .await
            .stage("Failed to build image")?;
        tracker
            .log_and_update_status(
                format!(
                    "Image built successfully: {} for application {}",
                    image, application.name
                ),
                DeploymentStatus::Building,
            )
            .await
            .stage("Failed to record status")?;

        tracker
            .update_status(DeploymentStatus::Deploying)
            .await
            .stage("Failed to record status")?;

        let result = self
            .deps
            .updater
            .update(&application, &deployment, &image, tracker)
            .await
            .stage("Failed to update container")?;
        result.apply_to(&mut deployment);
        self.deps
            .repository
            .update_deployment(&deployment)
            .await
            .stage("Failed to record container")?;
        tracker.step(format!(
            "Container updated successfully for application {} with container id {}",
            application.name, result.container_id
        ))
        .await;

        // the new container is already serving
        if let Err(e) = self
            .run_hook(tracker, "post-run", &application.post_run_command, &repo_path)
            .await
        {
            warn!(deployment_id = %deployment.id, "Post-run command failed: {}", e);
            tracker.step(format!("Post-run command failed: {}", e)).await;
        }

        tracker
            .log_and_update_status("Deployment completed successfully", DeploymentStatus::Deployed)
            .await
            .stage("Failed to record status")
    }

    fn repository_path(&self, application: &Application) -> String {
        format!(
            "{}/{}/{}",
            self.options.repositories_root.trim_end_matches('/'),
            application.user_id,
            application.id
        )
    }

    fn clone_url(&self, repository: &str) -> String {
        match &self.options.github_token {
            Some(token) => authenticated_url(repository, token),
            None => repository.to_string(),
        }
    }

    async fn checkout(
        &self,
        tracker: &DeploymentTracker,
        application: &Application,
        options: &DeploymentOptions,
        repo_path: &str,
    ) -> Result<(), DeployError> {
        match options.kind {
            DeploymentKind::Create => self.fresh_clone(tracker, application, repo_path).await,
            DeploymentKind::Redeploy => {
                self.update_checkout(tracker, application, options, repo_path)
                    .await
            }
        }
    }

    async fn fresh_clone(
        &self,
        tracker: &DeploymentTracker,
        application: &Application,
        repo_path: &str,
    ) -> Result<(), DeployError> {
        let url = self.clone_url(&application.repository);
        let git = &self.deps.git;

        tracker
            .step(format!("Cloning {} into {}", redact_url(&url), repo_path))
            .await;
        git.remove_repository(repo_path).await?;
        git.clone_repository(&url, repo_path).await?;
        git.switch_branch(repo_path, &application.branch).await
    }

    async fn update_checkout(
        &self,
        tracker: &DeploymentTracker,
        application: &Application,
        options: &DeploymentOptions,
        repo_path: &str,
    ) -> Result<(), DeployError> {
        let git = &self.deps.git;

        let dirty = match git.has_uncommitted_changes(repo_path).await {
            Ok(dirty) => dirty,
            Err(e) => {
                tracker
                    .step(format!("No usable checkout at {} ({}), cloning fresh", repo_path, e))
                    .await;
                return self.fresh_clone(tracker, application, repo_path).await;
            }
        };

        let stash = if dirty {
            tracker.step("Stashing local changes".to_string()).await;
            let stash_id = git.stash(repo_path).await?;
            git.reset_hard(repo_path).await?;
            Some(stash_id)
        } else {
            None
        };

        let url = self.clone_url(&application.repository);
        tracker
            .step(format!("Pulling {} from {}", application.branch, redact_url(&url)))
            .await;
        git.switch_branch(repo_path, &application.branch).await?;
        git.pull(&url, repo_path).await?;

        match (&options.commit_hash, &self.options.github_token) {
            (Some(commit), _) => {
                tracker.step(format!("Checking out commit {}", commit)).await;
                git.checkout_commit(repo_path, commit).await?;
            }
            (None, Some(token)) => {
                match git
                    .get_latest_commit_hash(&application.repository, token)
                    .await
                {
                    Ok(sha) => tracker.step(format!("Latest remote commit: {}", sha)).await,
                    Err(e) => warn!("Could not query latest commit: {}", e),
                }
            }
            (None, None) => {}
        }

        if let Some(stash_id) = stash {
            if let Err(e) = git.apply_stash(repo_path, &stash_id).await {
                tracker
                    .step(format!("Could not re-apply local changes, discarding them: {}", e))
                    .await;
                git.reset_hard(repo_path).await?;
            }
        }
        Ok(())
    }

    async fn record_commit(
        &self,
        tracker: &DeploymentTracker,
        deployment: &mut ApplicationDeployment,
        repo_path: &str,
    ) -> Result<(), DeployError> {
        match self.deps.git.head_commit(repo_path).await {
            Ok(hash) => {
                tracker.step(format!("Checked out commit {}", hash)).await;
                deployment.commit_hash = hash;
                deployment.updated_at = Utc::now();
                self.deps.repository.update_deployment(deployment).await
            }
            Err(e) => {
                warn!(deployment_id = %deployment.id, "Could not read commit hash: {}", e);
                Ok(())
            }
        }
    }

    async fn run_hook(
        &self,
        tracker: &DeploymentTracker,
        label: &str,
        command: &str,
        repo_path: &str,
    ) -> Result<(), DeployError> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(());
        }

        tracker.step(format!("Running {} command", label)).await;
        let remote = RemoteCommand::new(format!("cd {} && {}", quote(repo_path), command))
            .with_summary(format!("{} command in {}", label, repo_path))
            .with_timeout(self.options.hook_timeout);
        let output = run_once(self.deps.target.as_ref(), &remote).await?;
        if !output.success() {
            let code = output
                .exit_code
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(DeployError::HookError(format!(
                "{} command exited with {}: {}",
                label,
                code,
                output.combined().trim()
            )));
        }
        tracker.step(format!("{} command finished", label)).await;
        Ok(())
    }
}

/// Validate the application and derive its build
fn build_request(
    application: &Application,
    repo_path: &str,
    options: &DeploymentOptions,
) -> Result<BuildRequest, DeployError> {
    variables::decode(&application.environment_variables)?;
    Ok(BuildRequest {
        context_path: join_path(repo_path, &application.base_path),
        dockerfile: application.dockerfile_path.clone(),
        image_name: image_name(&application.name)?,
        build_args: variables::decode(&application.build_variables)?,
        options: BuildOptions {
            force: options.force,
            force_without_cache: options.force_without_cache,
        },
    })
}
