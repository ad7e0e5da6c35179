//! deployd - Entry Point
//!
//! Self-hosted deployment orchestrator: clones a repository, builds its
//! Dockerfile and atomically swaps the application's running container.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use deployd::app::options::{
    AppOptions, QueueConfig, RemoteOptions, ServerOptions, StorageOptions,
};
use deployd::app::run::run;
use deployd::deploy::atomic::UpdateOptions;
use deployd::filesys::file::File;
use deployd::logs::{init_logging, LogOptions};
use deployd::orchestrator::PipelineOptions;
use deployd::queue::QueueOptions;
use deployd::remote::ssh::SshOptions;
use deployd::storage::layout::StorageLayout;
use deployd::storage::settings::{RemoteMode, Settings};
use deployd::utils::version_info;
use deployd::workers::reconciler;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to print version: {e}"),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file; a missing default file means defaults
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = if settings_file.exists().await || cli_args.contains_key("config") {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {:?}: {e}", settings_file.path());
                return;
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        file: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = app_options(&settings, layout);
    info!("Running deployd with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run deployd: {e}");
    }
}

fn app_options(settings: &Settings, layout: StorageLayout) -> AppOptions {
    let secs = Duration::from_secs;
    let remote = &settings.remote;
    let queue = &settings.queue;
    let deploy = &settings.deploy;

    AppOptions {
        storage: StorageOptions {
            layout,
            backend: settings.storage.backend,
        },
        queue: QueueConfig {
            backend: queue.backend,
            options: QueueOptions {
                min_workers: queue.min_workers,
                max_workers: queue.max_workers,
                buffer_size: queue.buffer_size,
                reservation_size: queue.reservation_size,
                reservation_timeout: secs(queue.reservation_timeout_secs),
                wait_timeout: secs(queue.wait_timeout_secs),
                consumer_idle_timeout: secs(queue.consumer_idle_timeout_secs),
                retry_limit: queue.retry_limit,
                ..Default::default()
            },
        },
        remote: match remote.mode {
            RemoteMode::Local => RemoteOptions::Local {
                command_timeout: secs(remote.command_timeout_secs),
            },
            RemoteMode::Ssh => RemoteOptions::Ssh(SshOptions {
                host: remote.host.clone(),
                port: remote.port,
                user: remote.user.clone(),
                private_key_path: remote.private_key_path.clone(),
                connect_timeout: secs(remote.connect_timeout_secs),
                command_timeout: secs(remote.command_timeout_secs),
            }),
        },
        github_api_base_url: settings.github.api_base_url.clone(),
        pipeline: PipelineOptions {
            repositories_root: settings.repositories_root.clone(),
            github_token: settings.github.access_token.clone(),
            ..Default::default()
        },
        update: UpdateOptions {
            stabilize_delay: secs(deploy.stabilize_secs),
            stop_timeout: secs(deploy.stop_timeout_secs),
            network: deploy.network.clone(),
            hostname: deploy.hostname.clone(),
            ..Default::default()
        },
        port_range: deploy.port_range_start..=deploy.port_range_end,
        build_timeout: secs(remote.command_timeout_secs),
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        enable_reconciler: settings.reconciler.enabled,
        reconciler: reconciler::Options {
            interval: secs(settings.reconciler.interval_secs),
            stale_after: secs(settings.reconciler.stale_after_secs),
        },
        ..Default::default()
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
