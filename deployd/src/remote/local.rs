//! Commands on the host deployd runs on

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::DeployError;
use crate::remote::{execute, CommandOutput, RemoteCommand, RemoteSession, RemoteTarget};

/// Runs commands through `sh -c` on the local machine
#[derive(Debug, Clone)]
pub struct LocalShell {
    command_timeout: Duration,
}

impl LocalShell {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

struct LocalSession {
    command_timeout: Duration,
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, DeployError> {
        let mut process = Command::new("sh");
        process.arg("-c").arg(&command.script);
        execute(
            process,
            command.timeout.unwrap_or(self.command_timeout),
            &command.summary,
        )
        .await
    }

    async fn close(self: Box<Self>) -> Result<(), DeployError> {
        Ok(())
    }
}

#[async_trait]
impl RemoteTarget for LocalShell {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, DeployError> {
        Ok(Box::new(LocalSession {
            command_timeout: self.command_timeout,
        }))
    }

    fn name(&self) -> String {
        "local".to_string()
    }
}
