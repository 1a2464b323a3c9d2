//! Execution context models

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Prefix marking a host-list credential as a private key path
pub const KEY_CREDENTIAL_PREFIX: &str = "key:";

/// How the orchestrator reaches a host over SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address
    pub address: String,

    /// SSH port
    pub ssh_port: u16,

    /// Remote user
    pub user: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, ssh_port: u16, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ssh_port,
            user: user.into(),
        }
    }

    /// `user@address`, as used by ssh and ssh-copy-id
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    /// Docker host URL for the remote daemon
    pub fn docker_host(&self) -> String {
        format!("ssh://{}@{}:{}", self.user, self.address, self.ssh_port)
    }
}

/// Secret material used once while provisioning a context
#[derive(Debug)]
pub enum Credential {
    /// Password for the remote user
    Password(SecretString),

    /// Path to a private key already accepted by the host
    KeyFile(PathBuf),
}

impl Credential {
    /// Interpret a raw host-list credential field
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(KEY_CREDENTIAL_PREFIX) {
            Some(path) => Credential::KeyFile(PathBuf::from(path.trim())),
            None => Credential::Password(SecretString::from(raw.to_string())),
        }
    }

    pub fn password(raw: &str) -> Self {
        Credential::Password(SecretString::from(raw.to_string()))
    }
}

/// Context lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Pending,
    Provisioning,
    Ready,
    Failed,
}

impl ContextState {
    /// Only `Pending -> Provisioning -> {Ready | Failed}` is allowed
    pub fn can_transition_to(&self, next: ContextState) -> bool {
        matches!(
            (self, next),
            (ContextState::Pending, ContextState::Provisioning)
                | (ContextState::Provisioning, ContextState::Ready)
                | (ContextState::Provisioning, ContextState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextState::Pending => "pending",
            ContextState::Provisioning => "provisioning",
            ContextState::Ready => "ready",
            ContextState::Failed => "failed",
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named binding to one host's docker daemon.
///
/// The credential lives in the registry only until provisioning consumes it
/// and is never part of this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub name: String,
    pub endpoint: Endpoint,
    pub state: ContextState,
    pub last_error: Option<String>,

    /// Set when removal was requested while jobs were still queued
    #[serde(default)]
    pub removal_pending: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            endpoint,
            state: ContextState::Pending,
            last_error: None,
            removal_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ContextState::Ready
    }
}
