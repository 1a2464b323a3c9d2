//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Name of the compose file written for each context
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// Storage layout for the service
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Default host list
    pub fn hosts_file(&self) -> File {
        File::new(self.base_dir.join("hosts.csv"))
    }

    /// Get the deployments directory
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Working directory of one context's compose project
    pub fn context_dir(&self, context: &str) -> Dir {
        self.deployments_dir().subdir(context)
    }

    /// Compose file of the last deployment to `context`
    pub fn compose_file(&self, context: &str) -> File {
        self.context_dir(context).file(COMPOSE_FILE_NAME)
    }

    /// Get the SSH keys directory
    pub fn keys_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("keys"))
    }

    /// Private key installed on every managed host
    pub fn identity_file(&self) -> PathBuf {
        self.keys_dir().path().join("id_ed25519")
    }

    /// Managed ssh client config with one host alias per context
    pub fn ssh_config_file(&self) -> File {
        Dir::new(self.base_dir.join("ssh")).file("config")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        self.deployments_dir().create().await?;
        self.keys_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/dockfleet");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dockfleet");

        Self::new(base_dir)
    }
}
