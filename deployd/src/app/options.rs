//! Application configuration options

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::deploy::atomic::UpdateOptions;
use crate::deploy::ports::EPHEMERAL_PORTS;
use crate::orchestrator::PipelineOptions;
use crate::queue::QueueOptions;
use crate::remote::ssh::SshOptions;
use crate::source::hosting::DEFAULT_API_BASE_URL;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{QueueBackendKind, StorageBackend};
use crate::workers::reconciler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Deployment queue configuration
    pub queue: QueueConfig,

    /// Where commands run
    pub remote: RemoteOptions,

    /// Git hosting API base URL
    pub github_api_base_url: String,

    /// Pipeline options
    pub pipeline: PipelineOptions,

    /// Container replacement options
    pub update: UpdateOptions,

    /// Host ports handed to new containers
    pub port_range: RangeInclusive<u16>,

    /// Upper bound for a `docker build`
    pub build_timeout: Duration,

    /// Enable HTTP intake
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Enable the stale deployment sweep
    pub enable_reconciler: bool,

    /// Reconciler worker options
    pub reconciler: reconciler::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            queue: QueueConfig::default(),
            remote: RemoteOptions::default(),
            github_api_base_url: DEFAULT_API_BASE_URL.to_string(),
            pipeline: PipelineOptions::default(),
            update: UpdateOptions::default(),
            port_range: EPHEMERAL_PORTS,
            build_timeout: Duration::from_secs(1800),
            enable_server: true,
            server: ServerOptions::default(),
            enable_reconciler: true,
            reconciler: reconciler::Options::default(),
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            // bounds the server and reconciler only; queue drain waits
            // for in-flight deployments
            max_shutdown_delay: Duration::from_secs(120),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Store backend
    pub backend: StorageBackend,
}

/// Queue backend plus the deployment queue's options
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    pub backend: QueueBackendKind,
    pub options: QueueOptions,
}

/// Remote execution target
#[derive(Debug, Clone)]
pub enum RemoteOptions {
    Local { command_timeout: Duration },
    Ssh(SshOptions),
}

impl Default for RemoteOptions {
    fn default() -> Self {
        RemoteOptions::Local {
            command_timeout: Duration::from_secs(1800),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
