//! Container engine operations used by the atomic updater

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::deploy::variables::mask_env_entry;
use crate::errors::DeployError;
use crate::remote::{quote, run_once, RemoteCommand, RemoteTarget};

/// A container as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    /// Engine state, e.g. "running", "exited", "created"
    pub state: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// Still able to run or come back on its own ("running", "restarting",
    /// "paused", ...)
    pub fn is_live(&self) -> bool {
        !matches!(self.state.as_str(), "exited" | "dead" | "created")
    }
}

/// Inspection result of a single container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: String,
    /// `KEY=value` entries
    pub env: Vec<String>,
    /// Port the process listens on inside the container
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
    pub network: String,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// All containers, running or not, carrying the label
    async fn list_containers(&self, label: (&str, &str))
        -> Result<Vec<ContainerSummary>, DeployError>;

    /// Create a container and return its ID
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DeployError>;

    async fn start_container(&self, id: &str) -> Result<(), DeployError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), DeployError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DeployError>;

    /// Fails with [`DeployError::ContainerNotFound`] for unknown IDs
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, DeployError>;
}

// ================================== DOCKER CLI ================================== //

/// [`ContainerEngine`] driving the `docker` CLI on a remote target
pub struct DockerCliEngine {
    target: Arc<dyn RemoteTarget>,
}

impl DockerCliEngine {
    pub fn new(target: Arc<dyn RemoteTarget>) -> Self {
        Self { target }
    }

    async fn docker(&self, operation: &str, command: RemoteCommand) -> Result<String, DeployError> {
        let output = run_once(self.target.as_ref(), &command).await?;
        if !output.success() && is_not_found(&output.stderr) {
            return Err(DeployError::ContainerNotFound(output.stderr.trim().to_string()));
        }
        output.into_result(operation)
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

#[derive(Debug, Deserialize)]
struct InspectJson {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

/// `docker ps` prints labels as `k=v,k2=v2`
fn parse_labels(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_ps_output(output: &str) -> Result<Vec<ContainerSummary>, DeployError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let ps: PsLine = serde_json::from_str(line)?;
            Ok(ContainerSummary {
                id: ps.id,
                names: ps
                    .names
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
                image: ps.image,
                state: ps.state,
                labels: parse_labels(&ps.labels),
            })
        })
        .collect()
}

fn parse_inspect_output(output: &str) -> Result<ContainerDetails, DeployError> {
    let inspect: InspectJson = serde_json::from_str(output.trim())?;
    Ok(ContainerDetails {
        id: inspect.id,
        name: inspect.name.trim_start_matches('/').to_string(),
        image: inspect.config.image,
        status: inspect.state.status,
    })
}

/// The `docker create` invocation and a log-safe variant of it
fn create_command(spec: &ContainerSpec, masked_env: &[String]) -> (String, String) {
    let mut head = vec![
        "docker create".to_string(),
        format!("--name {}", quote(&spec.name)),
        format!("--hostname {}", quote(&spec.hostname)),
        format!("--network {}", quote(&spec.network)),
        format!("--expose {}", spec.container_port),
        format!(
            "-p {}",
            quote(&format!("{}:{}:{}/tcp", spec.host_ip, spec.host_port, spec.container_port))
        ),
        "-P".to_string(),
    ];
    for (key, value) in &spec.labels {
        head.push(format!("--label {}", quote(&format!("{}={}", key, value))));
    }

    let env_args = |env: &[String]| -> Vec<String> {
        env.iter().map(|e| format!("-e {}", quote(e))).collect()
    };
    let tail = quote(&spec.image);

    let script = [head.clone(), env_args(&spec.env), vec![tail.clone()]]
        .concat()
        .join(" ");
    let summary = [head, env_args(masked_env), vec![tail]].concat().join(" ");
    (script, summary)
}

fn mask_env_entries(env: &[String]) -> Vec<String> {
    env.iter().map(|entry| mask_env_entry(entry)).collect()
}

#[async_trait]
impl ContainerEngine for DockerCliEngine {
    async fn list_containers(
        &self,
        label: (&str, &str),
    ) -> Result<Vec<ContainerSummary>, DeployError> {
        let script = format!(
            "docker ps -a --no-trunc --filter {} --format {}",
            quote(&format!("label={}={}", label.0, label.1)),
            quote("{{json .}}")
        );
        let output = self
            .docker("docker ps", RemoteCommand::new(script))
            .await
            .map_err(|e| DeployError::FailedToListContainers(e.to_string()))?;
        parse_ps_output(&output).map_err(|e| DeployError::FailedToListContainers(e.to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DeployError> {
        let (script, summary) = create_command(spec, &mask_env_entries(&spec.env));
        let output = self
            .docker("docker create", RemoteCommand::new(script).with_summary(summary))
            .await?;
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| DeployError::remote("docker create", "no container id returned"))
    }

    async fn start_container(&self, id: &str) -> Result<(), DeployError> {
        let script = format!("docker start {}", quote(id));
        self.docker("docker start", RemoteCommand::new(script))
            .await
            .map(|_| ())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), DeployError> {
        let script = format!("docker stop -t {} {}", timeout.as_secs(), quote(id));
        let command = RemoteCommand::new(script).with_timeout(timeout + Duration::from_secs(30));
        self.docker("docker stop", command).await.map(|_| ())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DeployError> {
        let flag = if force { " -f" } else { "" };
        let script = format!("docker rm{} {}", flag, quote(id));
        self.docker("docker rm", RemoteCommand::new(script))
            .await
            .map(|_| ())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, DeployError> {
        let script = format!(
            "docker inspect --type container --format {} {}",
            quote("{{json .}}"),
            quote(id)
        );
        let output = self
            .docker("docker inspect", RemoteCommand::new(script))
            .await?;
        parse_inspect_output(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fail, ok, FakeTarget};

    fn spec() -> ContainerSpec {
        let mut labels = BTreeMap::new();
        labels.insert("com.application.id".to_string(), "app-1".to_string());
        ContainerSpec {
            name: "demo-1234abcd".to_string(),
            image: "demo:latest".to_string(),
            hostname: "deployd".to_string(),
            env: vec!["DB_PASSWORD=hunter2".to_string(), "PORT=3000".to_string()],
            container_port: 3000,
            host_ip: "0.0.0.0".to_string(),
            host_port: 50123,
            network: "bridge".to_string(),
            labels,
        }
    }

    #[test]
    fn test_parse_ps_output() {
        let output = concat!(
            r#"{"ID":"abc","Image":"demo:latest","Names":"demo-1","State":"running","Labels":"com.application.id=app-1,com.docker.compose.project=deployd"}"#,
            "\n",
            r#"{"ID":"def","Image":"demo:old","Names":"demo-0","State":"exited","Labels":""}"#,
            "\n"
        );
        let containers = parse_ps_output(output).unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_running());
        assert_eq!(containers[0].labels["com.application.id"], "app-1");
        assert_eq!(containers[1].state, "exited");
        assert!(containers[1].labels.is_empty());
    }

    #[test]
    fn test_parse_inspect_output() {
        let output = r#"{"Id":"abc","Name":"/demo-1","Config":{"Image":"demo:latest"},"State":{"Status":"running","Running":true}}"#;
        let details = parse_inspect_output(output).unwrap();
        assert_eq!(details.name, "demo-1");
        assert_eq!(details.image, "demo:latest");
        assert_eq!(details.status, "running");
    }

    #[test]
    fn test_create_command_masks_summary_only() {
        let spec = spec();
        let (script, summary) = create_command(&spec, &mask_env_entries(&spec.env));

        assert!(script.contains("-e DB_PASSWORD=hunter2"));
        assert!(script.contains("-p '0.0.0.0:50123:3000/tcp'"));
        assert!(script.contains("--network bridge"));
        assert!(script.contains("--label com.application.id=app-1"));
        assert!(script.ends_with(" 'demo:latest'"));

        assert!(!summary.contains("hunter2"));
        assert!(summary.contains("-e 'DB_PASSWORD=********'"));
        assert!(summary.contains("-e PORT=3000"));
    }

    #[tokio::test]
    async fn test_create_returns_id() {
        let target = Arc::new(FakeTarget::new());
        target.respond("docker create", ok("f00dbabe\n"));
        let engine = DockerCliEngine::new(target.clone());

        assert_eq!(engine.create_container(&spec()).await.unwrap(), "f00dbabe");
        assert!(!target.summaries()[0].contains("hunter2"));
    }

    #[tokio::test]
    async fn test_inspect_not_found() {
        let target = Arc::new(FakeTarget::new());
        target.respond("docker inspect", fail(1, "Error: No such container: gone"));
        let engine = DockerCliEngine::new(target);

        let err = engine.inspect_container("gone").await.unwrap_err();
        assert!(matches!(err, DeployError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_failure_kind() {
        let target = Arc::new(FakeTarget::new());
        target.respond("docker ps", fail(1, "Cannot connect to the Docker daemon"));
        let engine = DockerCliEngine::new(target);

        let err = engine.list_containers(("com.application.id", "x")).await.unwrap_err();
        assert!(matches!(err, DeployError::FailedToListContainers(_)));
    }

    #[tokio::test]
    async fn test_stop_and_remove_commands() {
        let target = Arc::new(FakeTarget::new());
        let engine = DockerCliEngine::new(target.clone());

        engine.stop_container("abc", Duration::from_secs(10)).await.unwrap();
        engine.remove_container("abc", true).await.unwrap();
        engine.start_container("abc").await.unwrap();

        assert_eq!(
            target.scripts(),
            vec!["docker stop -t 10 abc", "docker rm -f abc", "docker start abc"]
        );
    }
}
