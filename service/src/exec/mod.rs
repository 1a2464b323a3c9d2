//! Command execution against remote contexts

pub mod command;
pub mod executor;

pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use executor::{CommandExecutor, DOCKER_CONTEXT_ENV};
