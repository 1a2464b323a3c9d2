//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily log files under the storage logs directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Host list path, defaults to `hosts.csv` in the storage directory
    #[serde(default)]
    pub hosts_file: Option<String>,

    /// ssh config that gets an `Include` of the managed host aliases,
    /// defaults to `~/.ssh/config`; an empty string disables the edit
    #[serde(default)]
    pub ssh_user_config: Option<String>,

    /// Enable the HTTP server
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Provisioner configuration
    #[serde(default)]
    pub provisioner: ProvisionerSettings,

    /// Deployment pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Terminal jobs retained for status queries
    #[serde(default = "default_max_finished_jobs")]
    pub max_finished_jobs: usize,

    /// Grace period for running jobs on shutdown
    #[serde(default = "default_shutdown_secs")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_finished_jobs() -> usize {
    500
}

fn default_shutdown_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            hosts_file: None,
            ssh_user_config: None,
            enable_server: true,
            server: ServerSettings::default(),
            provisioner: ProvisionerSettings::default(),
            pipeline: PipelineSettings::default(),
            max_finished_jobs: default_max_finished_jobs(),
            max_shutdown_delay_secs: default_shutdown_secs(),
        }
    }
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
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Provisioner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step between attempts
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_true")]
    pub verify_daemon: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    8
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            max_concurrent: default_max_concurrent(),
            verify_daemon: true,
        }
    }
}

/// Deployment pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_prune_timeout")]
    pub prune_timeout_secs: u64,

    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,

    #[serde(default = "default_short_timeout")]
    pub file_timeout_secs: u64,

    #[serde(default = "default_short_timeout")]
    pub stats_timeout_secs: u64,

    #[serde(default = "default_short_timeout")]
    pub mount_timeout_secs: u64,

    /// `compose up` arguments for requests that supply none
    #[serde(default)]
    pub default_compose_args: Option<Vec<String>>,

    #[serde(default = "default_true")]
    pub verify_container_count: bool,
}

fn default_prune_timeout() -> u64 {
    60
}

fn default_deploy_timeout() -> u64 {
    600
}

fn default_short_timeout() -> u64 {
    30
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prune_timeout_secs: default_prune_timeout(),
            deploy_timeout_secs: default_deploy_timeout(),
            file_timeout_secs: default_short_timeout(),
            stats_timeout_secs: default_short_timeout(),
            mount_timeout_secs: default_short_timeout(),
            default_compose_args: None,
            verify_container_count: true,
        }
    }
}
