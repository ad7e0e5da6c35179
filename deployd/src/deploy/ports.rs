//! Host port allocation on the deployment host

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use tracing::debug;

use crate::errors::DeployError;
use crate::remote::{run_once, RemoteCommand, RemoteTarget};

/// Dynamic/private port range
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Socket tables from both `ss` and `netstat`; whichever is installed
/// contributes, and a missing tool is not an error.
const SOCKET_TABLE_SCRIPT: &str =
    "{ ss -tan 2>/dev/null || true; netstat -tan 2>/dev/null || true; }";

#[async_trait]
pub trait PortAllocator: Send + Sync {
    async fn allocate(&self) -> Result<u16, DeployError>;
}

/// Picks a random port that no socket on the target is bound to
pub struct RemotePortAllocator {
    target: Arc<dyn RemoteTarget>,
    range: RangeInclusive<u16>,
}

impl RemotePortAllocator {
    pub fn new(target: Arc<dyn RemoteTarget>, range: RangeInclusive<u16>) -> Self {
        Self { target, range }
    }
}

#[async_trait]
impl PortAllocator for RemotePortAllocator {
    async fn allocate(&self) -> Result<u16, DeployError> {
        let output = run_once(self.target.as_ref(), &RemoteCommand::new(SOCKET_TABLE_SCRIPT))
            .await
            .and_then(|out| out.into_result("list sockets"))
            .map_err(|e| DeployError::FailedToGetAvailablePort(e.to_string()))?;

        let used = parse_used_ports(&output);
        debug!(used = used.len(), "Collected ports in use");

        pick_free_port(&used, self.range.clone()).ok_or_else(|| {
            DeployError::FailedToGetAvailablePort(format!(
                "no free port in {}-{}",
                self.range.start(),
                self.range.end()
            ))
        })
    }
}

/// Every port that appears in an `address:port` column of `ss`/`netstat`
/// output, local or peer
pub fn parse_used_ports(output: &str) -> HashSet<u16> {
    output
        .lines()
        .flat_map(str::split_whitespace)
        .filter_map(|token| token.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse::<u16>().ok())
        .collect()
}

pub fn pick_free_port(used: &HashSet<u16>, range: RangeInclusive<u16>) -> Option<u16> {
    range
        .filter(|port| !used.contains(port))
        .choose(&mut rand::rng())
}
