//! Deployment module

pub mod compose;
pub mod docker;
pub mod files;
pub mod fsm;
pub mod pipeline;
pub mod scheduler;
pub mod stats;
