//! SSH reachability and key exchange

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::context::{Credential, Endpoint};

/// sshpass exit status for a rejected password
const SSHPASS_AUTH_FAILED: i32 = 5;

/// OpenSSH client options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_bin: String,
    pub ssh_keygen_bin: String,
    pub ssh_copy_id_bin: String,
    pub sshpass_bin: String,

    /// Private key installed on every host; `<path>.pub` is the public half
    pub identity_file: PathBuf,

    /// Managed config holding one `Host` block per context
    pub config_file: PathBuf,

    /// Config read by the ssh that docker spawns; `None` leaves it untouched
    pub user_config_file: Option<PathBuf>,

    pub connect_timeout: Duration,

    /// `StrictHostKeyChecking` value
    pub host_key_checking: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_bin: "ssh".to_string(),
            ssh_keygen_bin: "ssh-keygen".to_string(),
            ssh_copy_id_bin: "ssh-copy-id".to_string(),
            sshpass_bin: "sshpass".to_string(),
            identity_file: PathBuf::from("/var/lib/dockfleet/keys/id_ed25519"),
            config_file: PathBuf::from("/var/lib/dockfleet/ssh/config"),
            user_config_file: default_user_config(),
            connect_timeout: Duration::from_secs(10),
            host_key_checking: "accept-new".to_string(),
        }
    }
}

/// `~/.ssh/config` of the user running the orchestrator
pub fn default_user_config() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("config"))
}

impl SshOptions {
    pub fn public_key_file(&self) -> PathBuf {
        let mut path = self.identity_file.clone().into_os_string();
        path.push(".pub");
        PathBuf::from(path)
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.host_key_checking),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }

    /// Non-interactive `ssh` arguments authenticated by the managed key
    pub fn batch_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.identity_file.display().to_string(),
            "-p".to_string(),
            port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        args.extend(self.common_options());
        args
    }
}

/// SSH primitives the provisioner depends on
#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Bounded-timeout connection attempt to the SSH port
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> Result<(), OrchestratorError>;

    /// Install the managed public key on the host using `credential`
    async fn install_key(
        &self,
        name: &str,
        endpoint: &Endpoint,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<(), OrchestratorError>;
}

/// Host names and addresses only, no ports or URLs
fn is_well_formed_address(address: &str) -> bool {
    !address.is_empty()
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']'))
}

/// Decide whether a failed ssh/ssh-copy-id run is worth retrying
pub fn classify_failure(name: &str, endpoint: &Endpoint, output: &CommandOutput) -> OrchestratorError {
    let text = format!("{}\n{}", output.stderr, output.stdout).to_lowercase();

    if output.exit_code == SSHPASS_AUTH_FAILED || text.contains("permission denied") {
        return OrchestratorError::ProvisioningFailed {
            name: name.to_string(),
            reason: format!(
                "SSH authentication rejected for {}: {}",
                endpoint.destination(),
                output.describe_failure()
            ),
            transient: false,
        };
    }

    let transient = [
        "connection refused",
        "connection timed out",
        "operation timed out",
        "connection reset",
        "no route to host",
        "network is unreachable",
        "connection closed",
    ]
    .iter()
    .any(|pattern| text.contains(pattern));

    OrchestratorError::ProvisioningFailed {
        name: name.to_string(),
        reason: format!("key exchange failed: {}", output.describe_failure()),
        transient,
    }
}

/// Transport backed by the OpenSSH client tools
pub struct OpenSshTransport {
    options: SshOptions,
    runner: Arc<dyn CommandRunner>,

    // Concurrent provisioning tasks must not race to create the key pair
    keygen_lock: Mutex<()>,
}

impl OpenSshTransport {
    pub fn new(options: SshOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            options,
            runner,
            keygen_lock: Mutex::new(()),
        }
    }

    /// Create the managed ed25519 key pair if it does not exist yet
    pub async fn ensure_key_pair(&self, timeout: Duration) -> Result<(), OrchestratorError> {
        let _guard = self.keygen_lock.lock().await;

        let identity = &self.options.identity_file;
        if tokio::fs::try_exists(identity).await? {
            return Ok(());
        }
        if let Some(parent) = identity.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Generating SSH key pair at {}", identity.display());
        let spec = CommandSpec::new(self.options.ssh_keygen_bin.as_str())
            .args(["-t", "ed25519", "-q", "-N", "", "-C", "dockfleet", "-f"])
            .arg(identity.display().to_string());

        let output = self.runner.run(&spec, timeout).await?;
        if !output.is_success() {
            return Err(OrchestratorError::Internal(format!(
                "ssh-keygen failed: {}",
                output.describe_failure()
            )));
        }
        Ok(())
    }

    fn copy_id_args(&self, endpoint: &Endpoint, auth_key: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.options.public_key_file().display().to_string(),
            "-p".to_string(),
            endpoint.ssh_port.to_string(),
        ];
        args.extend(self.options.common_options());
        if let Some(key) = auth_key {
            args.push("-o".to_string());
            args.push(format!("IdentityFile={}", key.display()));
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push(endpoint.destination());
        args
    }
}

#[async_trait]
impl SshTransport for OpenSshTransport {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> Result<(), OrchestratorError> {
        if !is_well_formed_address(&endpoint.address) || endpoint.ssh_port == 0 {
            return Err(OrchestratorError::ProvisioningFailed {
                name: endpoint.address.clone(),
                reason: format!(
                    "malformed host address '{}:{}'",
                    endpoint.address, endpoint.ssh_port
                ),
                transient: false,
            });
        }

        let target = (endpoint.address.as_str(), endpoint.ssh_port);
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => {
                debug!("SSH port reachable on {}:{}", endpoint.address, endpoint.ssh_port);
                Ok(())
            }
            Ok(Err(e)) => Err(OrchestratorError::ProvisioningFailed {
                name: endpoint.address.clone(),
                reason: format!(
                    "cannot reach {}:{}: {}",
                    endpoint.address, endpoint.ssh_port, e
                ),
                transient: true,
            }),
            Err(_) => Err(OrchestratorError::ProvisioningFailed {
                name: endpoint.address.clone(),
                reason: format!(
                    "connection to {}:{} timed out after {:?}",
                    endpoint.address, endpoint.ssh_port, timeout
                ),
                transient: true,
            }),
        }
    }

    async fn install_key(
        &self,
        name: &str,
        endpoint: &Endpoint,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        self.ensure_key_pair(timeout).await?;

        let spec = match credential {
            // Password travels through the environment, never argv
            Credential::Password(password) => CommandSpec::new(self.options.sshpass_bin.as_str())
                .arg("-e")
                .arg(self.options.ssh_copy_id_bin.as_str())
                .args(self.copy_id_args(endpoint, None))
                .env("SSHPASS", password.expose_secret()),
            Credential::KeyFile(key) => CommandSpec::new(self.options.ssh_copy_id_bin.as_str())
                .args(self.copy_id_args(endpoint, Some(key))),
        };

        let output = self.runner.run(&spec, timeout).await?;
        if output.is_success() {
            debug!("Installed key on {} for context {}", endpoint.destination(), name);
            Ok(())
        } else {
            Err(classify_failure(name, endpoint, &output))
        }
    }
}
