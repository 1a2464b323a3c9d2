//! Docker CLI argument builders
//!
//! Only arguments are built here; the executor supplies the binary and binds
//! the target context through `DOCKER_CONTEXT`.

use crate::utils::shell_quote;

/// Extra `compose up` arguments used when a request supplies none
pub const DEFAULT_COMPOSE_ARGS: &[&str] = &["--force-recreate", "--pull", "always", "--quiet-pull"];

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub fn network_prune() -> Vec<String> {
    owned(&["network", "prune", "--force"])
}

/// Prune reported there was nothing to remove
pub fn is_nothing_to_prune(output: &str) -> bool {
    output.to_lowercase().contains("nothing to prune")
}

pub fn compose_up(project: &str, file: &str, extra: &[String]) -> Vec<String> {
    let mut args = owned(&[
        "compose",
        "--project-name",
        project,
        "--file",
        file,
        "up",
        "--detach",
        "--remove-orphans",
    ]);
    args.extend(extra.iter().cloned());
    args
}

/// Names of every container of the project, one per line
pub fn compose_ps_names(project: &str, file: &str) -> Vec<String> {
    owned(&[
        "compose",
        "--project-name",
        project,
        "--file",
        file,
        "ps",
        "--all",
        "--format",
        "{{.Names}}",
    ])
}

pub fn inspect(containers: &[String]) -> Vec<String> {
    let mut args = owned(&["inspect", "--type", "container"]);
    args.extend(containers.iter().cloned());
    args
}

/// One JSON document per line
pub fn stats(containers: &[String]) -> Vec<String> {
    let mut args = owned(&["stats", "--no-stream", "--format", "{{json .}}"]);
    args.extend(containers.iter().cloned());
    args
}

/// Overwrite `path` inside `container` with stdin
pub fn exec_write(container: &str, path: &str) -> Vec<String> {
    owned(&[
        "exec",
        "-i",
        container,
        "sh",
        "-c",
        &format!("cat > {}", shell_quote(path)),
    ])
}

pub fn exec_read(container: &str, path: &str) -> Vec<String> {
    owned(&["exec", container, "cat", path])
}

pub fn context_create(name: &str, docker_host: &str) -> Vec<String> {
    owned(&[
        "context",
        "create",
        name,
        "--docker",
        &format!("host={}", docker_host),
    ])
}

pub fn context_update(name: &str, docker_host: &str) -> Vec<String> {
    owned(&[
        "context",
        "update",
        name,
        "--docker",
        &format!("host={}", docker_host),
    ])
}

pub fn context_rm(name: &str) -> Vec<String> {
    owned(&["context", "rm", "--force", name])
}

/// Remote daemon version, proves the context binding works
pub fn server_version() -> Vec<String> {
    owned(&["version", "--format", "{{.Server.Version}}"])
}
