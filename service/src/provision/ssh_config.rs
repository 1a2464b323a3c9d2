//! Managed OpenSSH client config
//!
//! Docker's SSH connection helper runs plain `ssh`, which only knows the
//! identities and hosts of the user's ssh config. Every provisioned context
//! gets a `Host dockfleet.<name>` block here carrying its address, port, user
//! and the managed identity, and the docker context points at that alias.
//! The user's `~/.ssh/config` includes this file.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::context::Endpoint;
use crate::provision::ssh::SshOptions;

/// Prefix of every host alias written by the orchestrator
pub const HOST_ALIAS_PREFIX: &str = "dockfleet.";

const HEADER: &str = "# Managed by dockfleet, edits are overwritten";

/// ssh alias of a context
pub fn host_alias(context: &str) -> String {
    format!("{}{}", HOST_ALIAS_PREFIX, context)
}

/// One `Host` block of the managed file
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostBlock {
    alias: String,
    body: Vec<String>,
}

fn parse_blocks(contents: &str) -> Vec<HostBlock> {
    let mut blocks: Vec<HostBlock> = Vec::new();

    for line in contents.lines() {
        let trimmed = line.trim();
        if let Some(alias) = trimmed.strip_prefix("Host ") {
            blocks.push(HostBlock {
                alias: alias.trim().to_string(),
                body: Vec::new(),
            });
        } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
            if let Some(block) = blocks.last_mut() {
                block.body.push(trimmed.to_string());
            }
        }
    }
    blocks
}

fn render_blocks(blocks: &[HostBlock]) -> String {
    let mut out = format!("{}\n", HEADER);
    for block in blocks {
        out.push_str(&format!("\nHost {}\n", block.alias));
        for line in &block.body {
            out.push_str(&format!("  {}\n", line));
        }
    }
    out
}

/// Writes per-context `Host` blocks into the managed ssh config
pub struct SshHostConfig {
    file: File,
    user_config: Option<File>,
    identity_file: PathBuf,
    host_key_checking: String,

    // Provisioning tasks rewrite the same file
    lock: Mutex<()>,
}

impl SshHostConfig {
    pub fn new(options: &SshOptions) -> Self {
        Self {
            file: File::new(&options.config_file),
            user_config: options.user_config_file.as_ref().map(File::new),
            identity_file: options.identity_file.clone(),
            host_key_checking: options.host_key_checking.clone(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Write (or replace) the block of `context` and return its alias
    pub async fn upsert(
        &self,
        context: &str,
        endpoint: &Endpoint,
    ) -> Result<String, OrchestratorError> {
        let alias = host_alias(context);
        let _guard = self.lock.lock().await;

        self.ensure_included().await?;

        let mut blocks = self.read_blocks().await?;
        blocks.retain(|block| block.alias != alias);
        blocks.push(HostBlock {
            alias: alias.clone(),
            body: vec![
                format!("HostName {}", endpoint.address),
                format!("Port {}", endpoint.ssh_port),
                format!("User {}", endpoint.user),
                format!("IdentityFile \"{}\"", self.identity_file.display()),
                "IdentitiesOnly yes".to_string(),
                format!("StrictHostKeyChecking {}", self.host_key_checking),
                "BatchMode yes".to_string(),
            ],
        });

        self.file.write_string(&render_blocks(&blocks)).await?;
        debug!("Wrote ssh host {} to {}", alias, self.file.path().display());
        Ok(alias)
    }

    /// Drop the block of `context`, if any
    pub async fn remove(&self, context: &str) -> Result<(), OrchestratorError> {
        let alias = host_alias(context);
        let _guard = self.lock.lock().await;

        let mut blocks = self.read_blocks().await?;
        let before = blocks.len();
        blocks.retain(|block| block.alias != alias);
        if blocks.len() != before {
            self.file.write_string(&render_blocks(&blocks)).await?;
            debug!("Removed ssh host {}", alias);
        }
        Ok(())
    }

    /// Aliases currently present in the managed file
    pub async fn aliases(&self) -> Result<Vec<String>, OrchestratorError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_blocks()
            .await?
            .into_iter()
            .map(|block| block.alias)
            .collect())
    }

    async fn read_blocks(&self) -> Result<Vec<HostBlock>, OrchestratorError> {
        if !self.file.exists().await {
            return Ok(Vec::new());
        }
        Ok(parse_blocks(&self.file.read_string().await?))
    }

    /// Put an `Include` of the managed file at the top of the user's config.
    ///
    /// `Include` only applies globally before the first `Host` line.
    async fn ensure_included(&self) -> Result<(), OrchestratorError> {
        let Some(user_config) = &self.user_config else {
            return Ok(());
        };

        let include = format!("Include \"{}\"", self.file.path().display());
        let current = if user_config.exists().await {
            user_config.read_string().await?
        } else {
            String::new()
        };
        if current.lines().any(|line| line.trim() == include) {
            return Ok(());
        }

        info!(
            "Adding managed hosts to {}",
            user_config.path().display()
        );
        user_config
            .write_string(&format!("{}\n\n{}", include, current))
            .await
    }
}
