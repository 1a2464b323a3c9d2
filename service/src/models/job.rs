//! Deployment job models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deploy::fsm::JobFsm;
use crate::exec::CommandOutput;

/// Pipeline stage a job is executing (or failed in)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    NetworkPruned,
    Deploying,
    FilesUpdated,
    StatsCollected,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::NetworkPruned => "network_pruned",
            Stage::Deploying => "deploying",
            Stage::FilesUpdated => "files_updated",
            Stage::StatsCollected => "stats_collected",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job state as observed through `status()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Received,
    NetworkPruned,
    Deploying,
    FilesUpdated,
    StatsCollected,
    Succeeded,
    Failed { stage: Stage, reason: String },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed { .. } | JobState::Cancelled
        )
    }

    /// Stage being executed, `None` once terminal
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobState::Received => Some(Stage::Received),
            JobState::NetworkPruned => Some(Stage::NetworkPruned),
            JobState::Deploying => Some(Stage::Deploying),
            JobState::FilesUpdated => Some(Stage::FilesUpdated),
            JobState::StatsCollected => Some(Stage::StatsCollected),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Succeeded => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled => "cancelled",
            other => other.stage().map(|s| s.as_str()).unwrap_or("unknown"),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Failed { stage, reason } => write!(f, "failed({}): {}", stage, reason),
            other => f.write_str(other.name()),
        }
    }
}

/// How a file update is applied inside the container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileUpdateMode {
    /// Overwrite the file with `content`
    #[default]
    Replace,

    /// Deep-merge `content` (a JSON document) into the existing JSON file
    MergeJson,
}

/// A file pushed into a running container after bring-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    /// Container name or id
    pub container: String,

    /// Absolute path inside the container
    pub path: String,

    pub content: String,

    #[serde(default)]
    pub mode: FileUpdateMode,

    /// Merge strategies for `merge_json`, e.g. `{"mergeStrategy": "append"}`
    /// or per key under `properties`
    #[serde(default)]
    pub merge_schema: Option<Value>,
}

impl FileUpdate {
    pub fn replace(container: &str, path: &str, content: &str) -> Self {
        Self {
            container: container.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            mode: FileUpdateMode::Replace,
            merge_schema: None,
        }
    }

    pub fn merge_json(container: &str, path: &str, content: &str) -> Self {
        Self {
            mode: FileUpdateMode::MergeJson,
            ..Self::replace(container, path, content)
        }
    }
}

/// A host-side file referenced by the compose spec through a placeholder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFile {
    /// Absolute path on the target host
    pub source: String,

    pub content: String,
}

/// Deployment request accepted by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub context_name: String,

    /// Compose document, passed through to `docker compose`
    pub compose_spec: String,

    #[serde(default)]
    pub file_updates: Vec<FileUpdate>,

    /// Placeholder -> mount file
    #[serde(default)]
    pub mounts: BTreeMap<String, MountFile>,

    /// Extra `compose up` arguments, defaults apply when absent
    #[serde(default)]
    pub compose_args: Option<Vec<String>>,
}

impl DeploymentRequest {
    pub fn new(context_name: impl Into<String>, compose_spec: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            compose_spec: compose_spec.into(),
            ..Default::default()
        }
    }
}

/// File updates against containers that are already running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFilesRequest {
    pub context_name: String,
    pub file_updates: Vec<FileUpdate>,
}

/// What a job does once it leaves the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Full compose deployment
    #[default]
    Deployment,

    /// File updates only, no prune or bring-up
    FileUpdate,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Deployment => "deployment",
            JobKind::FileUpdate => "file_update",
        }
    }
}

/// Point-in-time status of one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
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

/// Per-container snapshot gathered after a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub collected_at: DateTime<Utc>,
    pub containers: Vec<ContainerStats>,
}

impl StatsSnapshot {
    pub fn empty() -> Self {
        Self {
            collected_at: Utc::now(),
            containers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Outputs accumulated while a job runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Output of `docker compose up`
    pub compose_log: Option<CommandOutput>,

    /// Containers listed for the compose project after bring-up
    #[serde(default)]
    pub containers: Vec<String>,

    /// One message per applied file update
    #[serde(default)]
    pub file_updates: Vec<String>,

    pub stats: Option<StatsSnapshot>,

    /// Downgraded failures (stats collection, tolerated prune)
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// One deployment request and everything known about its execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: String,

    #[serde(default)]
    pub kind: JobKind,

    pub context_name: String,
    pub compose_spec: String,
    pub file_updates: Vec<FileUpdate>,
    pub mounts: BTreeMap<String, MountFile>,
    pub compose_args: Option<Vec<String>>,

    #[serde(flatten)]
    pub fsm: JobFsm,

    pub result: JobResult,
    pub cancel_requested: bool,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentJob {
    pub fn new(id: String, request: DeploymentRequest) -> Self {
        Self {
            id,
            kind: JobKind::Deployment,
            context_name: request.context_name,
            compose_spec: request.compose_spec,
            file_updates: request.file_updates,
            mounts: request.mounts,
            compose_args: request.compose_args,
            fsm: JobFsm::new(),
            result: JobResult::default(),
            cancel_requested: false,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Job that only pushes files into running containers
    pub fn file_update(id: String, request: UpdateFilesRequest) -> Self {
        Self {
            kind: JobKind::FileUpdate,
            file_updates: request.file_updates,
            ..Self::new(id, DeploymentRequest::new(request.context_name, ""))
        }
    }

    pub fn state(&self) -> &JobState {
        self.fsm.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.fsm.state().is_terminal()
    }

    /// Failure stage and reason, if the job failed
    pub fn failure(&self) -> Option<(Stage, &str)> {
        match self.fsm.state() {
            JobState::Failed { stage, reason } => Some((*stage, reason.as_str())),
            _ => None,
        }
    }
}
