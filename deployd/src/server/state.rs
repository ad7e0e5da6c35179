//! Server state

use crate::orchestrator::DeployService;

/// Server state shared across handlers
pub struct ServerState {
    pub service: DeployService,
}

impl ServerState {
    pub fn new(service: DeployService) -> Self {
        Self { service }
    }
}
