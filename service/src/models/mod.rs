//! Domain models

pub mod context;
pub mod job;
