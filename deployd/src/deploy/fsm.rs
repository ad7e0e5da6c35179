//! Finite state machine for deployment status
//!
//! `Started → Cloning → Building → Deploying → Deployed`, or `Failed` from
//! any non-terminal state. Moving to a stage that was already reached is
//! accepted as a no-op so that a redelivered task can rerun the pipeline
//! without ever moving the status backwards.

use deploy_models::models::DeploymentStatus;

use crate::errors::DeployError;

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    StartCloning,
    StartBuilding,
    StartDeploying,
    Succeed,
    Fail(String),
}

impl DeploymentEvent {
    /// Status this event leads to
    pub fn target(&self) -> DeploymentStatus {
        match self {
            DeploymentEvent::StartCloning => DeploymentStatus::Cloning,
            DeploymentEvent::StartBuilding => DeploymentStatus::Building,
            DeploymentEvent::StartDeploying => DeploymentStatus::Deploying,
            DeploymentEvent::Succeed => DeploymentStatus::Deployed,
            DeploymentEvent::Fail(_) => DeploymentStatus::Failed,
        }
    }

    /// Event that leads to `status`; `Started` is only ever an initial state
    pub fn for_status(status: DeploymentStatus) -> Option<Self> {
        match status {
            DeploymentStatus::Started => None,
            DeploymentStatus::Cloning => Some(DeploymentEvent::StartCloning),
            DeploymentStatus::Building => Some(DeploymentEvent::StartBuilding),
            DeploymentStatus::Deploying => Some(DeploymentEvent::StartDeploying),
            DeploymentStatus::Deployed => Some(DeploymentEvent::Succeed),
            DeploymentStatus::Failed => Some(DeploymentEvent::Fail(String::new())),
        }
    }
}

/// Outcome of processing an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed and must be persisted
    Applied,
    /// The status was already reached; nothing to persist
    AlreadyReached,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create an FSM resuming from `status`
    pub fn new(status: DeploymentStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Get failure message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<Transition, DeployError> {
        let target = event.target();
        let transition = check_transition(self.status, target)?;

        if transition == Transition::Applied {
            if let DeploymentEvent::Fail(message) = event {
                self.error = Some(message);
            }
            self.status = target;
        }
        Ok(transition)
    }

    /// Process the event leading to `status`
    pub fn advance_to(&mut self, status: DeploymentStatus) -> Result<Transition, DeployError> {
        match DeploymentEvent::for_status(status) {
            Some(event) => self.process(event),
            None => check_transition(self.status, status),
        }
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new(DeploymentStatus::Started)
    }
}

/// Whether `from → to` is allowed
pub fn check_transition(
    from: DeploymentStatus,
    to: DeploymentStatus,
) -> Result<Transition, DeployError> {
    let invalid = || DeployError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    };

    if from == to {
        return Ok(Transition::AlreadyReached);
    }
    if from.is_terminal() {
        return Err(invalid());
    }
    if to == DeploymentStatus::Failed {
        return Ok(Transition::Applied);
    }

    match (from.stage(), to.stage()) {
        (Some(current), Some(next)) if next <= current => Ok(Transition::AlreadyReached),
        (Some(current), Some(next)) if next == current + 1 => Ok(Transition::Applied),
        _ => Err(invalid()),
    }
}
