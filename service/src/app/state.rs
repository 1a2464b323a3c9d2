//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::pipeline::DeploymentPipeline;
use crate::deploy::scheduler::DeploymentScheduler;
use crate::errors::OrchestratorError;
use crate::exec::{CommandExecutor, CommandRunner, ProcessRunner};
use crate::provision::ssh::{OpenSshTransport, SshTransport};
use crate::provision::ssh_config::SshHostConfig;
use crate::provision::Provisioner;
use crate::registry::ContextRegistry;
use crate::storage::layout::StorageLayout;

/// Main application state
pub struct AppState {
    /// Known execution contexts
    pub registry: Arc<ContextRegistry>,

    /// Context-bound command execution
    pub executor: Arc<CommandExecutor>,

    /// SSH context provisioner
    pub provisioner: Arc<Provisioner>,

    /// Deployment scheduler
    pub scheduler: DeploymentScheduler,

    /// Storage layout paths
    pub layout: StorageLayout,
}

impl AppState {
    /// Initialize application state backed by real processes
    pub async fn init(options: &AppOptions) -> Result<Self, OrchestratorError> {
        info!("Initializing application state...");
        options.layout.setup().await?;

        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let transport: Arc<dyn SshTransport> =
            Arc::new(OpenSshTransport::new(options.ssh.clone(), runner.clone()));

        Ok(Self::with_components(options, runner, transport))
    }

    /// Wire the components around the given process runner and SSH transport
    pub fn with_components(
        options: &AppOptions,
        runner: Arc<dyn CommandRunner>,
        transport: Arc<dyn SshTransport>,
    ) -> Self {
        let registry = Arc::new(ContextRegistry::new());
        let hosts = Arc::new(SshHostConfig::new(&options.ssh));

        let executor = Arc::new(CommandExecutor::new(
            registry.clone(),
            runner.clone(),
            options.provisioner.docker_bin.clone(),
            options.ssh.clone(),
            hosts.clone(),
        ));

        let provisioner = Arc::new(Provisioner::new(
            options.provisioner.clone(),
            registry.clone(),
            transport,
            runner,
            hosts,
        ));

        let pipeline = Arc::new(DeploymentPipeline::new(
            executor.clone(),
            options.layout.clone(),
            options.pipeline.clone(),
        ));

        let scheduler = DeploymentScheduler::new(
            options.scheduler.clone(),
            registry.clone(),
            executor.clone(),
            pipeline,
        );

        Self {
            registry,
            executor,
            provisioner,
            scheduler,
            layout: options.layout.clone(),
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self, options: &AppOptions) {
        info!("Shutting down application state...");
        self.provisioner.abort_all();
        self.scheduler
            .shutdown(options.lifecycle.max_shutdown_delay)
            .await;
    }
}
