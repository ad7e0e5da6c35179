//! Zero-downtime container replacement
//!
//! The new container is created before any old one is stopped, so an
//! application is never left without a container unless the old one had
//! already died. Every failure after creation removes the new container
//! before returning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deploy_models::models::{Application, ApplicationDeployment};
use tracing::{info, warn};

use crate::deploy::engine::{ContainerEngine, ContainerSpec, ContainerSummary};
use crate::deploy::ports::PortAllocator;
use crate::deploy::tracker::StepLogger;
use crate::deploy::variables;
use crate::errors::DeployError;
use crate::utils::short_id;

/// Discovery label; a container without it is invisible to later updates
pub const APPLICATION_LABEL: &str = "com.application.id";
/// Identifies the deployment that created a container
pub const DEPLOYMENT_LABEL: &str = "com.application.deployment.id";

/// Atomic update options
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Grace period between start and health verification
    pub stabilize_delay: Duration,
    /// Graceful stop timeout for old containers
    pub stop_timeout: Duration,
    pub network: String,
    pub hostname: String,
    pub host_ip: String,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            stabilize_delay: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            network: "bridge".to_string(),
            hostname: "deployd".to_string(),
            host_ip: "0.0.0.0".to_string(),
        }
    }
}

/// Result of a successful update, copied into the deployment record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicUpdateContainerResult {
    pub container_id: String,
    pub container_name: String,
    pub container_image: String,
    pub container_status: String,
    pub updated_at: DateTime<Utc>,
}

impl AtomicUpdateContainerResult {
    pub fn apply_to(&self, deployment: &mut ApplicationDeployment) {
        deployment.container_id = self.container_id.clone();
        deployment.container_name = self.container_name.clone();
        deployment.container_image = self.container_image.clone();
        deployment.container_status = self.container_status.clone();
        deployment.updated_at = self.updated_at;
    }
}

pub struct AtomicUpdater {
    engine: Arc<dyn ContainerEngine>,
    ports: Arc<dyn PortAllocator>,
    options: UpdateOptions,
}

impl AtomicUpdater {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        ports: Arc<dyn PortAllocator>,
        options: UpdateOptions,
    ) -> Self {
        Self {
            engine,
            ports,
            options,
        }
    }

    /// Replace the application's containers with one running `image`
    pub async fn update(
        &self,
        application: &Application,
        deployment: &ApplicationDeployment,
        image: &str,
        log: &dyn StepLogger,
    ) -> Result<AtomicUpdateContainerResult, DeployError> {
        if application.name.trim().is_empty() {
            return Err(DeployError::MissingImageName);
        }

        info!(
            application_id = %application.id,
            deployment_id = %deployment.id,
            "Updating container for {}",
            application.name
        );
        log.step(format!("Preparing to update container for {}", application.name))
            .await;

        // discover
        log.step("Checking for running containers...".to_string()).await;
        let application_id = application.id.to_string();
        let deployment_id = deployment.id.to_string();
        let discovered = self
            .engine
            .list_containers((APPLICATION_LABEL, &application_id))
            .await
            .map_err(|e| DeployError::FailedToListContainers(e.to_string()))?;
        log.step(format!("Found {} existing containers", discovered.len()))
            .await;

        let (own, previous): (Vec<ContainerSummary>, Vec<ContainerSummary>) = discovered
            .into_iter()
            .partition(|c| c.labels.get(DEPLOYMENT_LABEL) == Some(&deployment_id));

        // a redelivered task may find the container it already made
        let mut reusable = None;
        for container in own {
            if container.is_running() && reusable.is_none() {
                log.step(format!(
                    "Container {} already exists for this deployment",
                    container.id
                ))
                .await;
                reusable = Some(container.id);
            } else {
                log.step(format!(
                    "Removing leftover container {} from an earlier attempt",
                    container.id
                ))
                .await;
                if let Err(e) = self.engine.remove_container(&container.id, true).await {
                    warn!("Failed to remove leftover container {}: {}", container.id, e);
                }
            }
        }

        let reused = reusable.is_some();
        let container_id = match reusable {
            Some(id) => id,
            None => {
                let spec = self
                    .container_spec(application, deployment, image, log)
                    .await?;
                log.step("Creating new container...".to_string()).await;
                let id = self
                    .engine
                    .create_container(&spec)
                    .await
                    .map_err(|e| DeployError::FailedToCreateContainer(e.to_string()))?;
                log.step(format!("New container created: {}", id)).await;
                id
            }
        };

        self.drain(&previous, log).await;

        if !reused {
            log.step("Starting new container...".to_string()).await;
            if let Err(e) = self.engine.start_container(&container_id).await {
                log.step(format!("Failed to start container: {}", e)).await;
                log.step("Cleaning up failed container...".to_string()).await;
                self.discard(&container_id, false).await;
                return Err(DeployError::FailedToStartNewContainer(e.to_string()));
            }
            log.step("New container started successfully".to_string())
                .await;
        }

        log.step("Waiting for container to stabilize...".to_string())
            .await;
        tokio::time::sleep(self.options.stabilize_delay).await;

        log.step("Verifying container health...".to_string()).await;
        let details = match self.engine.inspect_container(&container_id).await {
            Ok(details) => details,
            Err(e) => {
                log.step(format!("Failed to get container info: {}", e)).await;
                log.step("Cleaning up failed container...".to_string()).await;
                self.discard(&container_id, true).await;
                return Err(DeployError::FailedToUpdateContainer(e.to_string()));
            }
        };
        if details.status != "running" {
            let message = format!("Container is not running, status: {}", details.status);
            log.step(message.clone()).await;
            log.step("Cleaning up failed container...".to_string()).await;
            self.discard(&container_id, true).await;
            return Err(DeployError::FailedToUpdateContainer(message));
        }

        log.step("Container update completed successfully".to_string())
            .await;
        Ok(AtomicUpdateContainerResult {
            container_id: details.id,
            container_name: details.name,
            container_image: details.image,
            container_status: details.status,
            updated_at: Utc::now(),
        })
    }

    async fn container_spec(
        &self,
        application: &Application,
        deployment: &ApplicationDeployment,
        image: &str,
        log: &dyn StepLogger,
    ) -> Result<ContainerSpec, DeployError> {
        let env = variables::decode(&application.environment_variables)?;
        log.step(format!(
            "Environment variables: [{}]",
            variables::masked_env_list(&env).join(" ")
        ))
        .await;
        log.step(format!("Container will expose port {}", application.port))
            .await;

        log.step("Finding available port...".to_string()).await;
        let host_port = match self.ports.allocate().await {
            Ok(port) => port,
            Err(e) => {
                log.step(format!("Failed to get available port: {}", e)).await;
                return Err(match e {
                    e @ DeployError::FailedToGetAvailablePort(_) => e,
                    other => DeployError::FailedToGetAvailablePort(other.to_string()),
                });
            }
        };
        log.step(format!("Found available port: {}", host_port)).await;

        let base_name = application.name.trim().to_lowercase().replace(' ', "-");
        let mut labels = BTreeMap::new();
        labels.insert(APPLICATION_LABEL.to_string(), application.id.to_string());
        labels.insert(DEPLOYMENT_LABEL.to_string(), deployment.id.to_string());

        Ok(ContainerSpec {
            name: format!("{}-{}", base_name, short_id(&deployment.id)),
            image: image.to_string(),
            hostname: self.options.hostname.clone(),
            env: variables::env_list(&env),
            container_port: application.port,
            host_ip: self.options.host_ip.clone(),
            host_port,
            network: self.options.network.clone(),
            labels,
        })
    }

    /// Best-effort graceful stop of the previous containers
    async fn drain(&self, previous: &[ContainerSummary], log: &dyn StepLogger) {
        let live: Vec<_> = previous.iter().filter(|c| c.is_live()).collect();
        if live.is_empty() {
            log.step("No existing containers found to stop".to_string())
                .await;
            return;
        }

        log.step(format!("Stopping {} existing containers...", live.len()))
            .await;
        for container in live {
            log.step(format!("Stopping old container: {}", container.id))
                .await;
            match self
                .engine
                .stop_container(&container.id, self.options.stop_timeout)
                .await
            {
                Ok(()) => {
                    log.step(format!("Successfully stopped container: {}", container.id))
                        .await
                }
                Err(e) => {
                    warn!("Failed to stop old container {}: {}", container.id, e);
                    log.step(format!("Failed to stop old container: {}", e)).await;
                }
            }
        }
    }

    /// Remove a new container that did not make it
    async fn discard(&self, id: &str, stop_first: bool) {
        if stop_first {
            if let Err(e) = self
                .engine
                .stop_container(id, self.options.stop_timeout)
                .await
            {
                warn!("Failed to stop container {} during cleanup: {}", id, e);
            }
        }
        if let Err(e) = self.engine.remove_container(id, true).await {
            warn!("Failed to remove container {} during cleanup: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, FakePorts, RecordingLogger};
    use deploy_models::models::BuildPack;
    use uuid::Uuid;

    fn application() -> Application {
        let now = Utc::now();
        Application {
            id: Uuid::new_v4(),
            name: "demo".to_string(),
            environment: "production".to_string(),
            build_variables: String::new(),
            environment_variables: "DB_PASSWORD=hunter2 PORT=3000".to_string(),
            build_pack: BuildPack::Dockerfile,
            repository: "https://github.com/acme/demo".to_string(),
            branch: "main".to_string(),
            pre_run_command: String::new(),
            post_run_command: String::new(),
            port: 3000,
            domain: String::new(),
            user_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            dockerfile_path: "Dockerfile".to_string(),
            base_path: "/".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn updater(engine: Arc<FakeEngine>, port: Option<u16>) -> AtomicUpdater {
        AtomicUpdater::new(
            engine,
            Arc::new(FakePorts::new(port)),
            UpdateOptions {
                stabilize_delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_first_deployment() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let deployment = ApplicationDeployment::new(app.id);
        let log = RecordingLogger::default();

        let result = updater(engine.clone(), Some(50123))
            .update(&app, &deployment, "demo:latest", &log)
            .await
            .unwrap();

        assert_eq!(result.container_status, "running");
        assert_eq!(result.container_image, "demo:latest");
        let running = engine.running_for(&app.id.to_string());
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, result.container_id);
        assert_eq!(running[0].host_port, 50123);
        assert!(running[0].env.contains(&"DB_PASSWORD=hunter2".to_string()));
        assert_eq!(
            running[0].labels.get(DEPLOYMENT_LABEL),
            Some(&deployment.id.to_string())
        );
    }

    #[tokio::test]
    async fn test_replaces_previous_containers() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let old: Vec<_> = (0..3)
            .map(|_| engine.seed(&app.id.to_string(), "running"))
            .collect();
        let log = RecordingLogger::default();

        let result = updater(engine.clone(), Some(50123))
            .update(&app, &ApplicationDeployment::new(app.id), "demo:latest", &log)
            .await
            .unwrap();

        let running = engine.running_for(&app.id.to_string());
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, result.container_id);
        for id in old {
            assert_eq!(engine.container(&id).unwrap().state, "exited");
        }
    }

    #[tokio::test]
    async fn test_restarting_and_paused_containers_are_stopped() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let restarting = engine.seed(&app.id.to_string(), "restarting");
        let paused = engine.seed(&app.id.to_string(), "paused");
        let exited = engine.seed(&app.id.to_string(), "exited");
        let log = RecordingLogger::default();

        updater(engine.clone(), Some(50123))
            .update(&app, &ApplicationDeployment::new(app.id), "demo:latest", &log)
            .await
            .unwrap();

        assert_eq!(engine.container(&restarting).unwrap().state, "exited");
        assert_eq!(engine.container(&paused).unwrap().state, "exited");
        assert_eq!(engine.container(&exited).unwrap().state, "exited");
        assert!(log
            .lines()
            .iter()
            .any(|l| l == "Stopping 2 existing containers..."));
        assert!(!log
            .lines()
            .iter()
            .any(|l| l == &format!("Stopping old container: {}", exited)));
    }

    #[tokio::test]
    async fn test_stuck_old_container_does_not_block() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let stuck = engine.seed(&app.id.to_string(), "running");
        engine.fail_stop_ids.lock().unwrap().push(stuck.clone());
        let log = RecordingLogger::default();

        let result = updater(engine.clone(), Some(50123))
            .update(&app, &ApplicationDeployment::new(app.id), "demo:latest", &log)
            .await
            .unwrap();

        assert_eq!(result.container_status, "running");
        assert_eq!(engine.container(&stuck).unwrap().state, "running");
        assert!(log
            .lines()
            .iter()
            .any(|l| l.starts_with("Failed to stop old container")));
    }

    #[tokio::test]
    async fn test_missing_name() {
        let engine = Arc::new(FakeEngine::new());
        let mut app = application();
        app.name = "  ".to_string();

        let err = updater(engine.clone(), Some(50123))
            .update(
                &app,
                &ApplicationDeployment::new(app.id),
                "demo:latest",
                &RecordingLogger::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::MissingImageName));
        assert!(engine.containers().is_empty());
    }

    #[tokio::test]
    async fn test_no_port_available() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let old = engine.seed(&app.id.to_string(), "running");

        let err = updater(engine.clone(), None)
            .update(
                &app,
                &ApplicationDeployment::new(app.id),
                "demo:latest",
                &RecordingLogger::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::FailedToGetAvailablePort(_)));
        assert_eq!(engine.containers().len(), 1);
        assert_eq!(engine.container(&old).unwrap().state, "running");
    }

    #[tokio::test]
    async fn test_create_failure() {
        let engine = Arc::new(FakeEngine::new());
        *engine.fail_create.lock().unwrap() = true;
        let app = application();

        let err = updater(engine.clone(), Some(50123))
            .update(
                &app,
                &ApplicationDeployment::new(app.id),
                "demo:latest",
                &RecordingLogger::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::FailedToCreateContainer(_)));
        assert!(engine.containers().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_removes_new_container() {
        let engine = Arc::new(FakeEngine::new());
        *engine.fail_start.lock().unwrap() = true;
        let app = application();
        let old = engine.seed(&app.id.to_string(), "running");

        let err = updater(engine.clone(), Some(50123))
            .update(
                &app,
                &ApplicationDeployment::new(app.id),
                "demo:latest",
                &RecordingLogger::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::FailedToStartNewContainer(_)));
        let remaining = engine.containers();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, old);
        assert_eq!(remaining[0].state, "exited");
    }

    #[tokio::test]
    async fn test_unhealthy_container_is_rolled_back() {
        let engine = Arc::new(FakeEngine::new());
        *engine.state_after_start.lock().unwrap() = Some("exited".to_string());
        let app = application();
        let old = engine.seed(&app.id.to_string(), "running");

        let err = updater(engine.clone(), Some(50123))
            .update(
                &app,
                &ApplicationDeployment::new(app.id),
                "demo:latest",
                &RecordingLogger::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::FailedToUpdateContainer(_)));
        let remaining = engine.containers();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, old);
        assert_eq!(remaining[0].state, "exited");
    }

    #[tokio::test]
    async fn test_secrets_are_masked_in_logs() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let log = RecordingLogger::default();

        updater(engine, Some(50123))
            .update(&app, &ApplicationDeployment::new(app.id), "demo:latest", &log)
            .await
            .unwrap();

        let lines = log.lines();
        assert!(lines.iter().all(|l| !l.contains("hunter2")));
        assert!(lines.iter().any(|l| l.contains("DB_PASSWORD=********")));
        assert!(lines.iter().any(|l| l.contains("PORT=3000")));
    }

    #[tokio::test]
    async fn test_redelivery_reuses_running_container() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let deployment = ApplicationDeployment::new(app.id);
        let existing = engine.seed_for_deployment(
            &app.id.to_string(),
            &deployment.id.to_string(),
            "running",
        );
        let ports = Arc::new(FakePorts::new(Some(50123)));
        let updater = AtomicUpdater::new(
            engine.clone(),
            ports.clone(),
            UpdateOptions {
                stabilize_delay: Duration::ZERO,
                ..Default::default()
            },
        );

        let result = updater
            .update(&app, &deployment, "demo:latest", &RecordingLogger::default())
            .await
            .unwrap();

        assert_eq!(result.container_id, existing);
        assert_eq!(engine.containers().len(), 1);
        assert_eq!(ports.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_redelivery_replaces_dead_container() {
        let engine = Arc::new(FakeEngine::new());
        let app = application();
        let deployment = ApplicationDeployment::new(app.id);
        let leftover = engine.seed_for_deployment(
            &app.id.to_string(),
            &deployment.id.to_string(),
            "created",
        );

        let result = updater(engine.clone(), Some(50123))
            .update(&app, &deployment, "demo:latest", &RecordingLogger::default())
            .await
            .unwrap();

        assert_ne!(result.container_id, leftover);
        assert!(engine.container(&leftover).is_none());
        assert_eq!(engine.running_for(&app.id.to_string()).len(), 1);
    }
}
