//! dockfleet library
//!
//! Context registry, SSH provisioning, context-bound command execution and
//! the deployment pipeline and scheduler behind the orchestrator API.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod inventory;
pub mod logs;
pub mod models;
pub mod provision;
pub mod registry;
pub mod server;
pub mod storage;
pub mod utils;
