//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::pipeline::PipelineSettings;
use crate::deploy::scheduler::SchedulerOptions;
use crate::provision::ssh::SshOptions;
use crate::provision::ProvisionerOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::BackoffOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Host list loaded at startup, skipped when absent
    pub hosts_file: Option<PathBuf>,

    /// Enable the HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Provisioner options
    pub provisioner: ProvisionerOptions,

    /// OpenSSH client options
    pub ssh: SshOptions,

    /// Deployment pipeline settings
    pub pipeline: PipelineSettings,

    /// Scheduler options
    pub scheduler: SchedulerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        let layout = StorageLayout::default();
        let ssh = SshOptions {
            identity_file: layout.identity_file(),
            config_file: layout.ssh_config_file().path().to_path_buf(),
            ..Default::default()
        };
        Self {
            lifecycle: LifecycleOptions::default(),
            hosts_file: Some(layout.hosts_file().path().to_path_buf()),
            layout,
            enable_server: true,
            server: ServerOptions::default(),
            provisioner: ProvisionerOptions::default(),
            ssh,
            pipeline: PipelineSettings::default(),
            scheduler: SchedulerOptions::default(),
        }
    }
}

impl AppOptions {
    /// Runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let provisioner = &settings.provisioner;
        let pipeline = &settings.pipeline;
        let defaults = Self::default();

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            hosts_file: Some(
                settings
                    .hosts_file
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| layout.hosts_file().path().to_path_buf()),
            ),
            enable_server: settings.enable_server,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            provisioner: ProvisionerOptions {
                max_attempts: provisioner.max_attempts,
                backoff: BackoffOptions {
                    base_delay: Duration::from_secs(provisioner.backoff_secs),
                    ..Default::default()
                },
                connect_timeout: Duration::from_secs(provisioner.connect_timeout_secs),
                command_timeout: Duration::from_secs(provisioner.command_timeout_secs),
                max_concurrent: provisioner.max_concurrent,
                verify_daemon: provisioner.verify_daemon,
                ..defaults.provisioner
            },
            ssh: SshOptions {
                identity_file: layout.identity_file(),
                config_file: layout.ssh_config_file().path().to_path_buf(),
                user_config_file: match &settings.ssh_user_config {
                    Some(path) if path.is_empty() => None,
                    Some(path) => Some(PathBuf::from(path)),
                    None => defaults.ssh.user_config_file.clone(),
                },
                connect_timeout: Duration::from_secs(provisioner.connect_timeout_secs),
                ..defaults.ssh
            },
            pipeline: PipelineSettings {
                prune_timeout: Duration::from_secs(pipeline.prune_timeout_secs),
                deploy_timeout: Duration::from_secs(pipeline.deploy_timeout_secs),
                file_timeout: Duration::from_secs(pipeline.file_timeout_secs),
                stats_timeout: Duration::from_secs(pipeline.stats_timeout_secs),
                mount_timeout: Duration::from_secs(pipeline.mount_timeout_secs),
                default_compose_args: pipeline
                    .default_compose_args
                    .clone()
                    .unwrap_or(defaults.pipeline.default_compose_args),
                verify_container_count: pipeline.verify_container_count,
            },
            scheduler: SchedulerOptions {
                max_finished_jobs: settings.max_finished_jobs,
                ..defaults.scheduler
            },
            layout,
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
            max_shutdown_delay: Duration::from_secs(30),
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
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}
