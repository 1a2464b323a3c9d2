//! Orchestrator API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// ================================ CONTEXTS ==================================== //

/// Context summary; endpoint and credential are never exposed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub removal_pending: bool,
}

/// Context list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextListResponse {
    pub contexts: Vec<ContextSummary>,
    pub total: usize,
}

/// Administrative context addition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddContextRequest {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub user: String,

    /// Password, or `key:<path>` for a private key file
    pub credential: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Context removal response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveContextResponse {
    pub name: String,

    /// `removed` or `deferred`
    pub outcome: String,
}

/// Status of one container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub image: Option<String>,
    pub status: Option<String>,
    pub health: Option<String>,
    pub restart_count: Option<u64>,
    pub started_at: Option<String>,
    pub cpu_percent: Option<String>,
    pub mem_usage: Option<String>,
    pub mem_percent: Option<String>,
    pub net_io: Option<String>,
    pub block_io: Option<String>,
    pub pids: Option<String>,
}

/// Point-in-time container snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub collected_at: DateTime<Utc>,
    pub containers: Vec<ContainerStatus>,
}

/// Context inspection response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectResponse {
    pub context: String,
    pub snapshot: StatsSnapshot,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// =============================== DEPLOYMENTS =================================== //

/// File pushed into a container after bring-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpdateRequest {
    pub container: String,
    pub path: String,
    pub content: String,

    /// `replace` (default) or `merge_json`
    #[serde(default)]
    pub mode: Option<String>,

    /// Merge strategies for `merge_json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_schema: Option<Value>,
}

/// File updates against a context's running containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFilesRequest {
    pub file_updates: Vec<FileUpdateRequest>,
}

/// Host file referenced from the compose spec by placeholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRequest {
    pub source: String,
    pub content: String,
}

/// Deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub context_name: String,
    pub compose_spec: String,
    #[serde(default)]
    pub file_updates: Vec<FileUpdateRequest>,
    #[serde(default)]
    pub mounts: BTreeMap<String, MountRequest>,
    #[serde(default)]
    pub compose_args: Option<Vec<String>>,
}

/// Deployment accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub job_id: String,
}

/// Captured output of the compose bring-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeLog {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Job status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,

    /// `deployment` or `file_update`
    pub kind: String,
    pub context_name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub cancel_requested: bool,
    pub history: Vec<String>,
    pub compose_log: Option<ComposeLog>,
    pub containers: Vec<String>,
    pub file_updates: Vec<String>,
    pub stats_snapshot: Option<StatsSnapshot>,
    pub warnings: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Job list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub total: usize,
}

/// Cancel response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,

    /// `cancelled` or `cancel_requested`
    pub outcome: String,
}
