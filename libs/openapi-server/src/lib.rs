//! Wire models of the orchestrator HTTP API

pub mod models;
