//! Deployment status FSM tests

use deploy_models::models::DeploymentStatus;
use deployd::deploy::fsm::{check_transition, DeploymentEvent, DeploymentFsm, Transition};
use deployd::errors::DeployError;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::default();
    assert_eq!(fsm.status(), DeploymentStatus::Started);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_failure_keeps_message() {
    let mut fsm = DeploymentFsm::default();

    fsm.process(DeploymentEvent::StartCloning).unwrap();
    fsm.process(DeploymentEvent::Fail("Failed to clone repository".to_string()))
        .unwrap();

    assert_eq!(fsm.status(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("Failed to clone repository"));
}

#[test]
fn test_fsm_rerun_after_crash_never_regresses() {
    // a redelivered task replays every stage from the start
    let mut fsm = DeploymentFsm::new(DeploymentStatus::Building);

    assert_eq!(
        fsm.advance_to(DeploymentStatus::Cloning).unwrap(),
        Transition::AlreadyReached
    );
    assert_eq!(
        fsm.advance_to(DeploymentStatus::Building).unwrap(),
        Transition::AlreadyReached
    );
    assert_eq!(fsm.status(), DeploymentStatus::Building);

    assert_eq!(
        fsm.advance_to(DeploymentStatus::Deploying).unwrap(),
        Transition::Applied
    );
    assert_eq!(fsm.status(), DeploymentStatus::Deploying);
}

#[test]
fn test_fsm_cannot_skip_stages() {
    let mut fsm = DeploymentFsm::default();
    let err = fsm.process(DeploymentEvent::StartDeploying).unwrap_err();

    assert!(matches!(err, DeployError::InvalidTransition { .. }));
    assert_eq!(fsm.status(), DeploymentStatus::Started);
}

#[test]
fn test_terminal_states_are_final() {
    for terminal in [DeploymentStatus::Deployed, DeploymentStatus::Failed] {
        assert_eq!(
            check_transition(terminal, terminal).unwrap(),
            Transition::AlreadyReached
        );
        assert!(check_transition(terminal, DeploymentStatus::Cloning).is_err());
    }
    assert!(check_transition(DeploymentStatus::Deployed, DeploymentStatus::Failed).is_err());
    assert!(check_transition(DeploymentStatus::Failed, DeploymentStatus::Deployed).is_err());
}
