//! Commands on a remote host over the system `ssh` client
//!
//! A session is one multiplexed control connection: `connect` starts the
//! master in the background, every `run` reuses its socket and `close` asks
//! the master to exit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::errors::DeployError;
use crate::remote::{execute, CommandOutput, RemoteCommand, RemoteSession, RemoteTarget};

/// SSH connection options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            user: "root".to_string(),
            private_key_path: None,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(600),
        }
    }
}

impl SshOptions {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Arguments shared by every ssh invocation of a session
    fn base_args(&self, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            control_path.to_string_lossy().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(key) = &self.private_key_path {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().to_string());
        }
        args
    }
}

/// Remote target reached over SSH
#[derive(Debug, Clone)]
pub struct SshShell {
    options: SshOptions,
}

impl SshShell {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

struct SshSession {
    options: SshOptions,
    control_path: PathBuf,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, DeployError> {
        let mut process = Command::new("ssh");
        process
            .args(self.options.base_args(&self.control_path))
            .arg(self.options.destination())
            .arg("--")
            .arg(&command.script);
        execute(
            process,
            command.timeout.unwrap_or(self.options.command_timeout),
            &command.summary,
        )
        .await
    }

    async fn close(self: Box<Self>) -> Result<(), DeployError> {
        let mut process = Command::new("ssh");
        process
            .args(self.options.base_args(&self.control_path))
            .args(["-O", "exit"])
            .arg(self.options.destination());
        let output = execute(process, self.options.connect_timeout, "ssh -O exit").await?;
        debug!(host = %self.options.host, "Closed ssh session");
        // The master removes its socket on exit; a leftover one is stale.
        let _ = tokio::fs::remove_file(&self.control_path).await;
        output.into_result("ssh close").map(|_| ())
    }
}

#[async_trait]
impl RemoteTarget for SshShell {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, DeployError> {
        let control_path = std::env::temp_dir().join(format!(
            "deployd-ssh-{}.sock",
            &Uuid::new_v4().simple().to_string()[..12]
        ));

        let mut process = Command::new("ssh");
        process
            .args(self.options.base_args(&control_path))
            .args(["-M", "-f", "-N"])
            .arg(self.options.destination());

        let output = execute(
            process,
            self.options.connect_timeout + Duration::from_secs(5),
            &format!("ssh connect {}", self.options.destination()),
        )
        .await?;
        output.into_result(&format!("ssh connect {}", self.options.destination()))?;

        debug!(host = %self.options.host, "Opened ssh session");
        Ok(Box::new(SshSession {
            options: self.options.clone(),
            control_path,
        }))
    }

    fn name(&self) -> String {
        format!("{}:{}", self.options.destination(), self.options.port)
    }
}
