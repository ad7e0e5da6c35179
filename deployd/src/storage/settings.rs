//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily-rolling log file under the storage directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP intake
    #[serde(default)]
    pub server: ServerSettings,

    /// Where repositories are cloned and containers run
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Directory on the remote target holding `<user id>/<application id>`
    /// checkouts
    #[serde(default = "default_repositories_root")]
    pub repositories_root: String,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub github: GithubSettings,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            remote: RemoteSettings::default(),
            repositories_root: default_repositories_root(),
            storage: StorageSettings::default(),
            queue: QueueSettings::default(),
            github: GithubSettings::default(),
            deploy: DeploySettings::default(),
            reconciler: ReconcilerSettings::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_repositories_root() -> String {
    "/var/lib/deployd/repositories".to_string()
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// How commands reach the deployment host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMode {
    /// Run on this machine
    #[default]
    Local,
    Ssh,
}

/// Remote target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub mode: RemoteMode,

    #[serde(default = "default_remote_host")]
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_remote_user")]
    pub user: String,

    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for any single command, builds included
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_user() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    1800
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            mode: RemoteMode::Local,
            host: default_remote_host(),
            port: default_ssh_port(),
            user: default_remote_user(),
            private_key_path: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Queue backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    Memory,
    #[default]
    File,
}

/// Queue settings, applied to the deployment queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub backend: QueueBackendKind,

    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_reservation_size")]
    pub reservation_size: usize,

    #[serde(default = "default_reservation_timeout")]
    pub reservation_timeout_secs: u64,

    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    #[serde(default = "default_consumer_idle_timeout")]
    pub consumer_idle_timeout_secs: u64,

    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    10
}

fn default_buffer_size() -> usize {
    100
}

fn default_reservation_size() -> usize {
    10
}

fn default_reservation_timeout() -> u64 {
    10
}

fn default_wait_timeout() -> u64 {
    5
}

fn default_consumer_idle_timeout() -> u64 {
    600
}

fn default_retry_limit() -> u32 {
    3
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::File,
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            buffer_size: default_buffer_size(),
            reservation_size: default_reservation_size(),
            reservation_timeout_secs: default_reservation_timeout(),
            wait_timeout_secs: default_wait_timeout(),
            consumer_idle_timeout_secs: default_consumer_idle_timeout(),
            retry_limit: default_retry_limit(),
        }
    }
}

/// Git hosting API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Used for private clones and commit lookups. Never serialized back.
    #[serde(default, skip_serializing)]
    pub access_token: Option<SecretString>,
}

fn default_api_base_url() -> String {
    crate::source::hosting::DEFAULT_API_BASE_URL.to_string()
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            access_token: None,
        }
    }
}

/// Container replacement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Wait between starting the new container and checking it
    #[serde(default = "default_stabilize")]
    pub stabilize_secs: u64,

    /// Grace period for stopping previous containers
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_stabilize() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_port_range_start() -> u16 {
    49152
}

fn default_port_range_end() -> u16 {
    65535
}

fn default_network() -> String {
    "bridge".to_string()
}

fn default_hostname() -> String {
    "deployd".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            stabilize_secs: default_stabilize(),
            stop_timeout_secs: default_stop_timeout(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            network: default_network(),
            hostname: default_hostname(),
        }
    }
}

/// Stale deployment sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// A `Started` deployment older than this is enqueued again
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    300
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}
