//! Error types for the orchestrator

use thiserror::Error;

use crate::models::job::Stage;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    // Registry
    #[error("Context already registered: {0}")]
    DuplicateName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid context transition for {name}: {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    // Scheduling
    #[error("Context not found: {0}")]
    ContextNotFound(String),

    #[error("Context not ready: {name} ({state})")]
    ContextNotReady { name: String, state: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already finished: {0}")]
    JobFinished(String),

    // Execution
    #[error("Command timed out after {timeout_secs}s: {command}")]
    ExecutionTimeout { command: String, timeout_secs: u64 },

    #[error("Failed to spawn {command}: {reason}")]
    SpawnError { command: String, reason: String },

    #[error("Provisioning failed for {name}: {reason}")]
    ProvisioningFailed {
        name: String,
        reason: String,
        transient: bool,
    },

    // Pipeline
    #[error("Invalid deployment spec: {0}")]
    ParseError(String),

    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    // Runtime
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Whether a provisioning error may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ProvisioningFailed { transient: true, .. }
                | OrchestratorError::ExecutionTimeout { .. }
        )
    }
}
