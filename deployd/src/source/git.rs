//! Git operations on the deployment host
//!
//! Each operation opens a session on the remote target, runs its command and
//! closes the session. Failures carry the operation name and the command's
//! output. Nothing here retries.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::debug;

use crate::errors::DeployError;
use crate::remote::{quote, run_once, run_sequence, RemoteCommand, RemoteTarget};
use crate::source::hosting::{redact_url, strip_credentials, HostingApi};

/// Message attached to stashes created before an update
pub const AUTO_STASH_MESSAGE: &str = "deployd-auto-stash";

/// Repository operations needed by the deployment pipeline
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_repository(&self, repo_url: &str, dest: &str) -> Result<(), DeployError>;

    /// Pull the currently checked out branch from `repo_url`
    async fn pull(&self, repo_url: &str, dest: &str) -> Result<(), DeployError>;

    async fn get_latest_commit_hash(
        &self,
        repo_url: &str,
        token: &SecretString,
    ) -> Result<String, DeployError>;

    async fn checkout_commit(&self, dest: &str, commit_hash: &str) -> Result<(), DeployError>;

    async fn switch_branch(&self, dest: &str, branch: &str) -> Result<(), DeployError>;

    async fn has_uncommitted_changes(&self, dest: &str) -> Result<bool, DeployError>;

    /// Stash local changes and return the stash commit hash
    async fn stash(&self, dest: &str) -> Result<String, DeployError>;

    async fn apply_stash(&self, dest: &str, stash_id: &str) -> Result<(), DeployError>;

    async fn reset_hard(&self, dest: &str) -> Result<(), DeployError>;

    async fn remove_repository(&self, path: &str) -> Result<(), DeployError>;

    /// Hash of the checked out commit
    async fn head_commit(&self, dest: &str) -> Result<String, DeployError>;
}

/// [`GitClient`] that shells out to `git` on a [`RemoteTarget`]
pub struct RemoteGitClient {
    target: Arc<dyn RemoteTarget>,
    hosting: HostingApi,
}

impl RemoteGitClient {
    pub fn new(target: Arc<dyn RemoteTarget>, hosting: HostingApi) -> Self {
        Self { target, hosting }
    }

    async fn exec(&self, operation: &str, command: RemoteCommand) -> Result<String, DeployError> {
        debug!(operation, command = %command.summary, "Running git operation");
        run_once(self.target.as_ref(), &command)
            .await?
            .into_result(operation)
    }
}

fn git_in(dest: &str, args: &str) -> String {
    format!("git -C {} {}", quote(dest), args)
}

#[async_trait]
impl GitClient for RemoteGitClient {
    async fn clone_repository(&self, repo_url: &str, dest: &str) -> Result<(), DeployError> {
        let parent = Path::new(dest)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let clean_url = strip_credentials(repo_url);

        // The origin is reset to the clean URL so no token is left in the
        // checkout's config.
        let script = format!(
            "mkdir -p {parent} && git clone {url} {dest} && {set_origin}",
            parent = quote(&parent),
            url = quote(repo_url),
            dest = quote(dest),
            set_origin = git_in(dest, &format!("remote set-url origin {}", quote(&clean_url))),
        );
        let summary = format!("git clone {} {}", redact_url(repo_url), dest);

        self.exec("git clone", RemoteCommand::new(script).with_summary(summary))
            .await
            .map(|_| ())
    }

    async fn pull(&self, repo_url: &str, dest: &str) -> Result<(), DeployError> {
        let script = git_in(
            dest,
            &format!(
                "pull --ff-only {} \"$({})\"",
                quote(repo_url),
                git_in(dest, "rev-parse --abbrev-ref HEAD")
            ),
        );
        let summary = format!("git pull {} in {}", redact_url(repo_url), dest);

        self.exec("git pull", RemoteCommand::new(script).with_summary(summary))
            .await
            .map(|_| ())
    }

    async fn get_latest_commit_hash(
        &self,
        repo_url: &str,
        token: &SecretString,
    ) -> Result<String, DeployError> {
        self.hosting.latest_commit_hash(repo_url, token).await
    }

    async fn checkout_commit(&self, dest: &str, commit_hash: &str) -> Result<(), DeployError> {
        let script = git_in(dest, &format!("checkout {}", quote(commit_hash)));
        self.exec("git checkout", RemoteCommand::new(script))
            .await
            .map(|_| ())
    }

    async fn switch_branch(&self, dest: &str, branch: &str) -> Result<(), DeployError> {
        let script = git_in(dest, &format!("checkout {}", quote(branch)));
        self.exec("git switch branch", RemoteCommand::new(script))
            .await
            .map(|_| ())
    }

    async fn has_uncommitted_changes(&self, dest: &str) -> Result<bool, DeployError> {
        let output = self
            .exec("git status", RemoteCommand::new(git_in(dest, "status --porcelain")))
            .await?;
        Ok(!output.trim().is_empty())
    }

    async fn stash(&self, dest: &str) -> Result<String, DeployError> {
        let commands = [
            RemoteCommand::new(git_in(
                dest,
                &format!("stash push -m {}", quote(AUTO_STASH_MESSAGE)),
            )),
            RemoteCommand::new(git_in(dest, "stash list --format='%H' -n 1")),
        ];
        let outputs = run_sequence(self.target.as_ref(), "git stash", &commands).await?;

        let stash_id = outputs
            .last()
            .map(|out| out.trim().to_string())
            .unwrap_or_default();
        if stash_id.is_empty() {
            return Err(DeployError::remote("git stash", "no stash entry was created"));
        }
        Ok(stash_id)
    }

    async fn apply_stash(&self, dest: &str, stash_id: &str) -> Result<(), DeployError> {
        let script = git_in(dest, &format!("stash apply {}", quote(stash_id)));
        self.exec("git stash apply", RemoteCommand::new(script))
            .await
            .map(|_| ())
    }

    async fn reset_hard(&self, dest: &str) -> Result<(), DeployError> {
        self.exec("git reset", RemoteCommand::new(git_in(dest, "reset --hard HEAD")))
            .await
            .map(|_| ())
    }

    async fn remove_repository(&self, path: &str) -> Result<(), DeployError> {
        let trimmed = path.trim().trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
            return Err(DeployError::ConfigError(format!(
                "refusing to remove repository path {:?}",
                path
            )));
        }
        self.exec("remove repository", RemoteCommand::new(format!("rm -rf -- {}", quote(trimmed))))
            .await
            .map(|_| ())
    }

    async fn head_commit(&self, dest: &str) -> Result<String, DeployError> {
        let output = self
            .exec("git rev-parse", RemoteCommand::new(git_in(dest, "rev-parse HEAD")))
            .await?;
        Ok(output.trim().to_string())
    }
}
