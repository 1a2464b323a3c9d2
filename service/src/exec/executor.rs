//! Context-bound command execution

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::deploy::docker;
use crate::errors::OrchestratorError;
use crate::exec::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::context::ExecutionContext;
use crate::provision::ssh::SshOptions;
use crate::provision::ssh_config::SshHostConfig;
use crate::registry::ContextRegistry;
use crate::utils::shell_quote;

/// Environment variable docker uses to select the active context
pub const DOCKER_CONTEXT_ENV: &str = "DOCKER_CONTEXT";

/// Runs commands against the remote daemon of a `Ready` context
pub struct CommandExecutor {
    registry: Arc<ContextRegistry>,
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
    ssh: SshOptions,
    hosts: Arc<SshHostConfig>,
}

impl CommandExecutor {
    pub fn new(
        registry: Arc<ContextRegistry>,
        runner: Arc<dyn CommandRunner>,
        docker_bin: impl Into<String>,
        ssh: SshOptions,
        hosts: Arc<SshHostConfig>,
    ) -> Self {
        Self {
            registry,
            runner,
            docker_bin: docker_bin.into(),
            ssh,
            hosts,
        }
    }

    /// Look up a context and require it to be `Ready`
    pub fn ensure_ready(&self, context: &str) -> Result<ExecutionContext, OrchestratorError> {
        let ctx = self.registry.get(context).map_err(|e| match e {
            OrchestratorError::NotFound(name) => OrchestratorError::ContextNotFound(name),
            other => other,
        })?;

        if !ctx.is_ready() {
            return Err(OrchestratorError::ContextNotReady {
                name: ctx.name,
                state: ctx.state.to_string(),
            });
        }
        Ok(ctx)
    }

    /// Run `spec` with `DOCKER_CONTEXT` bound to `context`.
    ///
    /// A non-zero exit is returned as data, only timeouts and spawn failures
    /// are errors.
    pub async fn run(
        &self,
        context: &str,
        spec: CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, OrchestratorError> {
        let ctx = self.ensure_ready(context)?;
        let spec = spec.env(DOCKER_CONTEXT_ENV, ctx.name.as_str());

        let output = self.runner.run(&spec, timeout).await?;
        debug!(
            "[{}] {} exited with {}",
            ctx.name,
            spec.command_line(),
            output.exit_code
        );
        Ok(output)
    }

    /// Run a docker CLI command against `context`
    pub async fn docker(
        &self,
        context: &str,
        args: Vec<String>,
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<CommandOutput, OrchestratorError> {
        let mut spec = CommandSpec::new(self.docker_bin.as_str()).args(args);
        spec.stdin = stdin;
        self.run(context, spec, timeout).await
    }

    /// Write `content` to `path` on the context's host over SSH
    pub async fn write_host_file(
        &self,
        context: &str,
        path: &str,
        content: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, OrchestratorError> {
        let ctx = self.ensure_ready(context)?;

        let parent = match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        };
        let script = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(&parent),
            shell_quote(path)
        );

        let spec = CommandSpec::new(self.ssh.ssh_bin.as_str())
            .args(self.ssh.batch_args(ctx.endpoint.ssh_port))
            .arg(ctx.endpoint.destination())
            .arg(script)
            .stdin(content);

        self.runner.run(&spec, timeout).await
    }

    /// Remove the docker context binding, regardless of context state
    pub async fn unbind(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, OrchestratorError> {
        let spec = CommandSpec::new(self.docker_bin.as_str()).args(docker::context_rm(name));
        self.runner.run(&spec, timeout).await
    }

    /// Drop the managed ssh alias of a removed context
    pub async fn forget_host(&self, name: &str) -> Result<(), OrchestratorError> {
        self.hosts.remove(name).await
    }
}
