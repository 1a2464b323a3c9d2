//! Context registry
//!
//! In-memory record of every known execution context. Records are cloned out
//! under a single lock so readers always see a whole record. The registry does
//! no I/O; state transitions are driven by the provisioner.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::models::context::{ContextState, Credential, Endpoint, ExecutionContext};

struct ContextEntry {
    context: ExecutionContext,
    credential: Option<Credential>,
}

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, ContextEntry>,
    order: Vec<String>,
}

/// Registry of execution contexts
#[derive(Default)]
pub struct ContextRegistry {
    entries: RwLock<Entries>,
}

/// Docker context names: alphanumeric start, then `[A-Za-z0-9_.+-]`
pub fn validate_context_name(name: &str) -> Result<(), OrchestratorError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => chars
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::ConfigError(format!(
            "Invalid context name: '{}'",
            name
        )))
    }
}

impl ContextRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new context in `Pending` state
    pub fn register(
        &self,
        name: &str,
        endpoint: Endpoint,
        credential: Credential,
    ) -> Result<ExecutionContext, OrchestratorError> {
        validate_context_name(name)?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.by_name.contains_key(name) {
            return Err(OrchestratorError::DuplicateName(name.to_string()));
        }

        let context = ExecutionContext::new(name, endpoint);
        entries.by_name.insert(
            name.to_string(),
            ContextEntry {
                context: context.clone(),
                credential: Some(credential),
            },
        );
        entries.order.push(name.to_string());

        debug!("Registered context {}", name);
        Ok(context)
    }

    /// Get a context by name
    pub fn get(&self, name: &str) -> Result<ExecutionContext, OrchestratorError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .by_name
            .get(name)
            .map(|entry| entry.context.clone())
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))
    }

    /// All contexts in insertion order
    pub fn list(&self) -> Vec<ExecutionContext> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .order
            .iter()
            .filter_map(|name| entries.by_name.get(name))
            .map(|entry| entry.context.clone())
            .collect()
    }

    /// Names of contexts still waiting to be provisioned
    pub fn pending(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|c| c.state == ContextState::Pending)
            .map(|c| c.name)
            .collect()
    }

    /// Move a context to `new_state`, recording `error` when it fails
    pub fn update_state(
        &self,
        name: &str,
        new_state: ContextState,
        error: Option<String>,
    ) -> Result<ExecutionContext, OrchestratorError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .by_name
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;

        let current = entry.context.state;
        if !current.can_transition_to(new_state) {
            return Err(OrchestratorError::InvalidTransition {
                name: name.to_string(),
                from: current.to_string(),
                to: new_state.to_string(),
            });
        }

        entry.context.state = new_state;
        entry.context.last_error = match new_state {
            ContextState::Failed => error.or_else(|| Some("unknown error".to_string())),
            _ => None,
        };
        entry.context.updated_at = Utc::now();

        debug!("Context {}: {} -> {}", name, current, new_state);
        Ok(entry.context.clone())
    }

    /// Hand the credential to the provisioner; later calls return `None`
    pub fn take_credential(&self, name: &str) -> Option<Credential> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .by_name
            .get_mut(name)
            .and_then(|entry| entry.credential.take())
    }

    /// Flag a context for removal once its queued jobs finish
    pub fn mark_for_removal(&self, name: &str) -> Result<ExecutionContext, OrchestratorError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .by_name
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;

        entry.context.removal_pending = true;
        entry.context.updated_at = Utc::now();
        Ok(entry.context.clone())
    }

    /// Drop a context from the registry
    pub fn remove(&self, name: &str) -> Result<ExecutionContext, OrchestratorError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .by_name
            .remove(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;
        entries.order.retain(|n| n != name);

        debug!("Removed context {}", name);
        Ok(entry.context)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
