//! Main application run loop

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::OrchestratorError;
use crate::inventory::{load_host_list, register_hosts};
use crate::registry::ContextRegistry;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the orchestrator until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OrchestratorError> {
    info!("Initializing dockfleet...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start dockfleet: {}", e);
        shutdown_manager.shutdown(&options).await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown(&options).await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), OrchestratorError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    if let Some(hosts_file) = &options.hosts_file {
        load_hosts(&app_state.registry, hosts_file).await?;
    }

    init_provisioning(app_state.clone(), shutdown_manager)?;

    if options.enable_server {
        init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(())
}

async fn load_hosts(registry: &ContextRegistry, path: &Path) -> Result<(), OrchestratorError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => {}
        _ => {
            warn!("Host list {} not found, starting with no contexts", path.display());
            return Ok(());
        }
    }

    let records = load_host_list(path).await?;
    let names = register_hosts(registry, records)?;
    info!("Registered {} context(s): {}", names.len(), names.join(", "));
    Ok(())
}

fn init_provisioning(
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), OrchestratorError> {
    info!("Provisioning registered contexts...");

    let provisioner = app_state.provisioner.clone();
    let handle = tokio::spawn(async move {
        let ready = provisioner.provision_all().await;
        info!("Initial provisioning finished, {} context(s) processed", ready.len());
    });

    shutdown_manager.with_provisioning_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::from_app_state(&app_state);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), OrchestratorError>>>,
    provisioning_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            provisioning_handle: None,
        }
    }

    fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), OrchestratorError> {
        if self.app_state.is_some() {
            return Err(OrchestratorError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    fn with_provisioning_handle(&mut self, handle: JoinHandle<()>) -> Result<(), OrchestratorError> {
        if self.provisioning_handle.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "provisioning_handle already set".to_string(),
            ));
        }
        self.provisioning_handle = Some(handle);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), OrchestratorError>>,
    ) -> Result<(), OrchestratorError> {
        if self.server_handle.is_some() {
            return Err(OrchestratorError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self, options: &AppOptions) -> Result<(), OrchestratorError> {
        let _ = self.shutdown_tx.send(());

        // Running jobs get the shutdown delay, teardown of the rest gets the same again
        let deadline = self.lifecycle_options.max_shutdown_delay * 2;
        match tokio::time::timeout(deadline, self.shutdown_impl(options)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", deadline);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self, options: &AppOptions) -> Result<(), OrchestratorError> {
        info!("Shutting down dockfleet...");

        // 1. HTTP server, so no new work is accepted
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))??;
        }

        // 2. Initial provisioning waiter; its per-context tasks go with the app state
        if let Some(handle) = self.provisioning_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    return Err(OrchestratorError::ShutdownError(e.to_string()));
                }
            }
        }

        // 3. App state, aborting provisioning tasks and draining running jobs
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown(options).await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
