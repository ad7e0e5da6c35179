//! Remote execution targets
//!
//! Every operation against the deployment host opens a session, runs its
//! shell command(s) and closes the session again. No connection is shared
//! between workers.

pub mod local;
pub mod ssh;

use std::borrow::Cow;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::DeployError;

pub use local::LocalShell;
pub use ssh::{SshOptions, SshShell};

/// A shell command to run on the target
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    /// Script passed to the remote shell
    pub script: String,
    /// What gets logged in place of the script; never contains secrets
    pub summary: String,
    /// Overrides the target's default command timeout
    pub timeout: Option<Duration>,
}

impl RemoteCommand {
    pub fn new(script: impl Into<String>) -> Self {
        let script = script.into();
        Self {
            summary: script.clone(),
            script,
            timeout: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr and stdout joined, trimmed
    pub fn combined(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, _) => stdout.to_string(),
            (false, true) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stderr, stdout),
        }
    }

    /// stdout on success, otherwise an error naming the operation
    pub fn into_result(self, operation: &str) -> Result<String, DeployError> {
        if self.success() {
            return Ok(self.stdout);
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(DeployError::remote(
            operation,
            format!("exit status {}, output: {}", code, self.combined()),
        ))
    }
}

/// An open session on a target
#[async_trait]
pub trait RemoteSession: Send {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, DeployError>;

    async fn close(self: Box<Self>) -> Result<(), DeployError>;
}

/// A host that deployments run against
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, DeployError>;

    /// Human readable name for logs
    fn name(&self) -> String;
}

/// Open a session, run one command and close the session
pub async fn run_once(
    target: &dyn RemoteTarget,
    command: &RemoteCommand,
) -> Result<CommandOutput, DeployError> {
    let mut session = target.connect().await?;
    let result = session.run(command).await;
    if let Err(e) = session.close().await {
        warn!(target = %target.name(), "Failed to close remote session: {}", e);
    }
    result
}

/// Open a session, run the commands in order and close the session.
/// Stops at the first command that exits non-zero.
pub async fn run_sequence(
    target: &dyn RemoteTarget,
    operation: &str,
    commands: &[RemoteCommand],
) -> Result<Vec<String>, DeployError> {
    let mut session = target.connect().await?;
    let mut outputs = Vec::with_capacity(commands.len());
    let mut result = Ok(());

    for command in commands {
        match session.run(command).await.and_then(|out| out.into_result(operation)) {
            Ok(stdout) => outputs.push(stdout),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    if let Err(e) = session.close().await {
        warn!(target = %target.name(), "Failed to close remote session: {}", e);
    }
    result.map(|_| outputs)
}

/// Quote a single shell word
pub fn quote(value: &str) -> String {
    shell_escape::escape(Cow::Borrowed(value)).into_owned()
}

/// Spawn a prepared command and wait for it, killing it when the timeout
/// elapses
pub(crate) async fn execute(
    mut command: Command,
    timeout: Duration,
    summary: &str,
) -> Result<CommandOutput, DeployError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = %summary, "Executing command");

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => {
            let output = output?;
            Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Err(_) => Err(DeployError::remote(
            summary,
            format!("timed out after {:?}", timeout),
        )),
    }
}
