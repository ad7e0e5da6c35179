//! In-process fakes for unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::deploy::engine::{ContainerDetails, ContainerEngine, ContainerSpec, ContainerSummary};
use crate::deploy::ports::PortAllocator;
use crate::deploy::tracker::StepLogger;
use crate::errors::DeployError;
use crate::queue::{Message, TaskContext};
use crate::remote::{CommandOutput, RemoteCommand, RemoteSession, RemoteTarget};

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Context of a delivery that is on its `attempt`-th try
pub fn task_context(attempt: u32) -> TaskContext {
    let mut message = Message::new(None, "test-task", serde_json::Value::Null);
    message.attempts = attempt;
    let (_cancel, receiver) = tokio::sync::watch::channel(false);
    TaskContext::new("test-queue", &message, receiver)
}

// ================================ REMOTE TARGET ================================= //

#[derive(Default)]
struct FakeTargetState {
    rules: Vec<(String, CommandOutput)>,
    scripts: Vec<String>,
    summaries: Vec<String>,
    connects: usize,
    closes: usize,
}

/// Records every script and answers with the first rule whose pattern the
/// script contains. Unmatched scripts succeed with empty output.
#[derive(Default)]
pub struct FakeTarget {
    state: Arc<Mutex<FakeTargetState>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.state
            .lock()
            .unwrap()
            .rules
            .push((pattern.to_string(), output));
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().unwrap().scripts.clone()
    }

    pub fn summaries(&self) -> Vec<String> {
        self.state.lock().unwrap().summaries.clone()
    }

    /// (connects, closes)
    pub fn sessions(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.connects, state.closes)
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeTargetState>>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, DeployError> {
        let mut state = self.state.lock().unwrap();
        state.scripts.push(command.script.clone());
        state.summaries.push(command.summary.clone());
        Ok(state
            .rules
            .iter()
            .find(|(pattern, _)| command.script.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ok("")))
    }

    async fn close(self: Box<Self>) -> Result<(), DeployError> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl RemoteTarget for FakeTarget {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, DeployError> {
        self.state.lock().unwrap().connects += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }

    fn name(&self) -> String {
        "fake".to_string()
    }
}

// =============================== CONTAINER ENGINE =============================== //

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub labels: BTreeMap<String, String>,
    pub env: Vec<String>,
    pub host_port: u16,
}

#[derive(Default)]
struct FakeEngineState {
    containers: Vec<FakeContainer>,
    next_id: usize,
}

/// Container engine kept in memory
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeEngineState>,
    pub fail_create: Mutex<bool>,
    pub fail_start: Mutex<bool>,
    /// State a started container reports, "running" unless set
    pub state_after_start: Mutex<Option<String>>,
    /// Container IDs whose stop call fails
    pub fail_stop_ids: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container, returning its ID
    pub fn seed(&self, application_id: &str, state: &str) -> String {
        let mut s = self.state.lock().unwrap();
        s.next_id += 1;
        let id = format!("seed{:04}", s.next_id);
        let name = format!("old-{}", s.next_id);
        let mut labels = BTreeMap::new();
        labels.insert("com.application.id".to_string(), application_id.to_string());
        s.containers.push(FakeContainer {
            id: id.clone(),
            name,
            image: "demo:previous".to_string(),
            state: state.to_string(),
            labels,
            env: Vec::new(),
            host_port: 0,
        });
        id
    }

    /// Seed a container carrying a deployment label
    pub fn seed_for_deployment(&self, application_id: &str, deployment_id: &str, state: &str) -> String {
        let id = self.seed(application_id, state);
        let mut s = self.state.lock().unwrap();
        if let Some(container) = s.containers.iter_mut().find(|c| c.id == id) {
            container
                .labels
                .insert("com.application.deployment.id".to_string(), deployment_id.to_string());
        }
        id
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.containers().into_iter().find(|c| c.id == id)
    }

    pub fn running_for(&self, application_id: &str) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| {
                c.state == "running"
                    && c.labels.get("com.application.id").map(String::as_str) == Some(application_id)
            })
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_containers(
        &self,
        label: (&str, &str),
    ) -> Result<Vec<ContainerSummary>, DeployError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| c.labels.get(label.0).map(String::as_str) == Some(label.1))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                image: c.image.clone(),
                state: c.state.clone(),
                labels: c.labels.clone().into_iter().collect::<HashMap<_, _>>(),
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DeployError> {
        if *self.fail_create.lock().unwrap() {
            return Err(DeployError::remote("docker create", "no space left on device"));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("new{:04}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "created".to_string(),
            labels: spec.labels.clone(),
            env: spec.env.clone(),
            host_port: spec.host_port,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DeployError> {
        if *self.fail_start.lock().unwrap() {
            return Err(DeployError::remote("docker start", "port is already allocated"));
        }
        let next_state = self
            .state_after_start
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "running".to_string());
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DeployError::ContainerNotFound(id.to_string()))?;
        container.state = next_state;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: std::time::Duration) -> Result<(), DeployError> {
        if self.fail_stop_ids.lock().unwrap().iter().any(|f| f == id) {
            return Err(DeployError::remote("docker stop", "container is stuck"));
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DeployError::ContainerNotFound(id.to_string()))?;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), DeployError> {
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(DeployError::ContainerNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, DeployError> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| ContainerDetails {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                status: c.state.clone(),
            })
            .ok_or_else(|| DeployError::ContainerNotFound(id.to_string()))
    }
}

// ================================ PORT ALLOCATOR ================================ //

/// Hands out a fixed port, or fails when `None`
pub struct FakePorts {
    pub port: Option<u16>,
    pub calls: AtomicUsize,
}

impl FakePorts {
    pub fn new(port: Option<u16>) -> Self {
        Self {
            port,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PortAllocator for FakePorts {
    async fn allocate(&self) -> Result<u16, DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.port
            .ok_or_else(|| DeployError::FailedToGetAvailablePort("no free port in range".to_string()))
    }
}

// ================================== STEP LOGGER ================================= //

/// Keeps every step line in memory
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepLogger for RecordingLogger {
    async fn step(&self, message: String) {
        self.lines.lock().unwrap().push(message);
    }
}
