//! SSH context provisioner
//!
//! Drives each context through `Pending -> Provisioning -> {Ready | Failed}`.
//! Transient network failures are retried with linear backoff; anything else
//! fails the context immediately. Contexts are provisioned independently so
//! one broken host never holds up the rest of the fleet.

pub mod ssh;
pub mod ssh_config;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::deploy::docker;
use crate::errors::OrchestratorError;
use crate::exec::{CommandRunner, CommandSpec, DOCKER_CONTEXT_ENV};
use crate::models::context::{ContextState, Credential, ExecutionContext};
use crate::registry::ContextRegistry;
use crate::utils::{calc_linear_backoff, BackoffOptions};

use self::ssh::SshTransport;
use self::ssh_config::SshHostConfig;

/// Provisioner options
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    /// Reachability/key exchange attempts before giving up
    pub max_attempts: u32,

    pub backoff: BackoffOptions,

    /// Timeout of a single TCP probe
    pub connect_timeout: Duration,

    /// Timeout of each external command (ssh-copy-id, docker context)
    pub command_timeout: Duration,

    /// Contexts provisioned at the same time
    pub max_concurrent: usize,

    /// Query the remote daemon version once the context is bound
    pub verify_daemon: bool,

    pub docker_bin: String,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffOptions::default(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(60),
            max_concurrent: 8,
            verify_daemon: true,
            docker_bin: "docker".to_string(),
        }
    }
}

/// Provisions execution contexts
pub struct Provisioner {
    options: ProvisionerOptions,
    registry: Arc<ContextRegistry>,
    transport: Arc<dyn SshTransport>,
    runner: Arc<dyn CommandRunner>,
    hosts: Arc<SshHostConfig>,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Provisioner {
    pub fn new(
        options: ProvisionerOptions,
        registry: Arc<ContextRegistry>,
        transport: Arc<dyn SshTransport>,
        runner: Arc<dyn CommandRunner>,
        hosts: Arc<SshHostConfig>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        Self {
            options,
            registry,
            transport,
            runner,
            hosts,
            semaphore,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Provision one `Pending` context and return its final record.
    ///
    /// Provisioning failures end up in the context state; an error is only
    /// returned when the context is unknown or not `Pending`.
    pub async fn provision(&self, name: &str) -> Result<ExecutionContext, OrchestratorError> {
        let ctx = self
            .registry
            .update_state(name, ContextState::Provisioning, None)?;
        info!("Provisioning context {} ({})", name, ctx.endpoint.docker_host());

        let outcome = match self.registry.take_credential(name) {
            Some(credential) => self.establish(&ctx, &credential).await,
            None => Err(OrchestratorError::ProvisioningFailed {
                name: name.to_string(),
                reason: "no credential available".to_string(),
                transient: false,
            }),
        };

        let result = match outcome {
            Ok(()) => {
                info!("Context {} is ready", name);
                self.registry.update_state(name, ContextState::Ready, None)
            }
            Err(e) => {
                error!("Failed to provision context {}: {}", name, e);
                self.registry
                    .update_state(name, ContextState::Failed, Some(e.to_string()))
            }
        };

        // Removed while provisioning: nothing else will clean up the binding
        if let Err(OrchestratorError::NotFound(_)) = &result {
            self.release(name).await;
        }
        result
    }

    /// Provision every `Pending` context concurrently
    pub async fn provision_all(self: &Arc<Self>) -> Vec<ExecutionContext> {
        let pending = self.registry.pending();
        info!("Provisioning {} context(s)", pending.len());

        let handles: Vec<_> = pending.into_iter().map(|name| self.spawn(name)).collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(ctx)) => results.push(ctx),
                Ok(Err(e)) => warn!("Provisioning skipped: {}", e),
                Err(e) => error!("Provisioning task panicked: {}", e),
            }
        }
        results
    }

    /// Provision a context in the background
    pub fn spawn(
        self: &Arc<Self>,
        name: String,
    ) -> JoinHandle<Result<ExecutionContext, OrchestratorError>> {
        let provisioner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _permit = provisioner
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
            provisioner.provision(&name).await
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
        handle
    }

    /// Abort every provisioning task still running
    pub fn abort_all(&self) {
        let tasks: Vec<AbortHandle> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        let running = tasks.iter().filter(|task| !task.is_finished()).count();
        if running > 0 {
            info!("Aborting {} provisioning task(s)", running);
        }
        for task in tasks {
            task.abort();
        }
    }

    /// Provisioning tasks that have not finished yet
    pub fn running_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Undo a binding whose context no longer exists
    async fn release(&self, name: &str) {
        warn!("Context {} was removed while provisioning, releasing its binding", name);

        let rm = CommandSpec::new(self.options.docker_bin.as_str()).args(docker::context_rm(name));
        match self.runner.run(&rm, self.options.command_timeout).await {
            Ok(output) if output.is_success() => debug!("Removed docker context {}", name),
            Ok(output) => debug!(
                "No docker context {} to remove: {}",
                name,
                output.describe_failure()
            ),
            Err(e) => warn!("Failed to remove docker context {}: {}", name, e),
        }
        if let Err(e) = self.hosts.remove(name).await {
            warn!("Failed to remove ssh host of {}: {}", name, e);
        }
    }

    async fn establish(
        &self,
        ctx: &ExecutionContext,
        credential: &Credential,
    ) -> Result<(), OrchestratorError> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.exchange_keys(ctx, credential).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = calc_linear_backoff(&self.options.backoff, attempt);
                    warn!(
                        "Context {} attempt {}/{} failed, retrying in {:?}: {}",
                        ctx.name, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(OrchestratorError::ProvisioningFailed {
                        name: ctx.name.clone(),
                        reason: format!("gave up after {} attempts: {}", attempt, e),
                        transient: false,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.bind(ctx).await
    }

    async fn exchange_keys(
        &self,
        ctx: &ExecutionContext,
        credential: &Credential,
    ) -> Result<(), OrchestratorError> {
        self.transport
            .probe(&ctx.endpoint, self.options.connect_timeout)
            .await?;
        self.transport
            .install_key(&ctx.name, &ctx.endpoint, credential, self.options.command_timeout)
            .await
    }

    /// Create (or repoint) the docker context at the host's daemon.
    ///
    /// The context targets the host's managed ssh alias so the ssh spawned
    /// by docker authenticates with the installed key.
    async fn bind(&self, ctx: &ExecutionContext) -> Result<(), OrchestratorError> {
        let alias = self.hosts.upsert(&ctx.name, &ctx.endpoint).await?;
        let docker_host = format!("ssh://{}", alias);
        let timeout = self.options.command_timeout;

        let create = CommandSpec::new(self.options.docker_bin.as_str())
            .args(docker::context_create(&ctx.name, &docker_host));
        let mut output = self.runner.run(&create, timeout).await?;

        if !output.is_success() && output.stderr.contains("already exists") {
            let update = CommandSpec::new(self.options.docker_bin.as_str())
                .args(docker::context_update(&ctx.name, &docker_host));
            output = self.runner.run(&update, timeout).await?;
        }

        if !output.is_success() {
            return Err(OrchestratorError::ProvisioningFailed {
                name: ctx.name.clone(),
                reason: format!("docker context binding failed: {}", output.describe_failure()),
                transient: false,
            });
        }

        if self.options.verify_daemon {
            let version = CommandSpec::new(self.options.docker_bin.as_str())
                .args(docker::server_version())
                .env(DOCKER_CONTEXT_ENV, ctx.name.as_str());
            let output = self.runner.run(&version, timeout).await?;
            if !output.is_success() {
                return Err(OrchestratorError::ProvisioningFailed {
                    name: ctx.name.clone(),
                    reason: format!("remote docker daemon unreachable: {}", output.describe_failure()),
                    transient: false,
                });
            }
            info!(
                "Context {} bound to docker {}",
                ctx.name,
                output.stdout.trim()
            );
        }

        Ok(())
    }
}
