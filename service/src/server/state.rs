//! Server state

use std::sync::Arc;

use crate::app::state::AppState;
use crate::deploy::scheduler::DeploymentScheduler;
use crate::provision::Provisioner;
use crate::registry::ContextRegistry;

/// Server state shared across handlers
pub struct ServerState {
    pub registry: Arc<ContextRegistry>,
    pub provisioner: Arc<Provisioner>,
    pub scheduler: DeploymentScheduler,
}

impl ServerState {
    pub fn new(
        registry: Arc<ContextRegistry>,
        provisioner: Arc<Provisioner>,
        scheduler: DeploymentScheduler,
    ) -> Self {
        Self {
            registry,
            provisioner,
            scheduler,
        }
    }

    pub fn from_app_state(app_state: &AppState) -> Self {
        Self::new(
            app_state.registry.clone(),
            app_state.provisioner.clone(),
            app_state.scheduler.clone(),
        )
    }
}
