//! Post-deployment container status and resource usage

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::deploy::docker;
use crate::errors::OrchestratorError;
use crate::exec::CommandExecutor;
use crate::models::job::{ContainerStats, Stage, StatsSnapshot};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectEntry {
    name: String,
    config: InspectConfig,
    state: InspectState,
    restart_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: Option<String>,
    started_at: Option<String>,
    health: Option<InspectHealth>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectHealth {
    status: Option<String>,
}

/// One line of `docker stats --format {{json .}}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsLine {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CPUPerc")]
    cpu_percent: Option<String>,
    #[serde(rename = "MemUsage")]
    mem_usage: Option<String>,
    #[serde(rename = "MemPerc")]
    mem_percent: Option<String>,
    #[serde(rename = "NetIO")]
    net_io: Option<String>,
    #[serde(rename = "BlockIO")]
    block_io: Option<String>,
    #[serde(rename = "PIDs")]
    pids: Option<String>,
}

/// Parse the JSON array printed by `docker inspect`
pub fn parse_inspect(stdout: &str) -> Result<Vec<ContainerStats>, OrchestratorError> {
    let entries: Vec<InspectEntry> = serde_json::from_str(stdout)?;
    Ok(entries
        .into_iter()
        .map(|entry| ContainerStats {
            name: entry.name.trim_start_matches('/').to_string(),
            image: entry.config.image,
            status: entry.state.status,
            health: entry.state.health.and_then(|h| h.status),
            restart_count: entry.restart_count,
            started_at: entry.state.started_at,
            ..Default::default()
        })
        .collect())
}

/// Merge `docker stats` lines into the matching containers.
///
/// Returns how many lines could not be parsed.
pub fn merge_stats(containers: &mut [ContainerStats], stdout: &str) -> usize {
    let mut malformed = 0;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let stats: StatsLine = match serde_json::from_str(line) {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Skipping stats line {:?}: {}", line, e);
                malformed += 1;
                continue;
            }
        };

        if let Some(container) = containers.iter_mut().find(|c| c.name == stats.name) {
            container.cpu_percent = stats.cpu_percent;
            container.mem_usage = stats.mem_usage;
            container.mem_percent = stats.mem_percent;
            container.net_io = stats.net_io;
            container.block_io = stats.block_io;
            container.pids = stats.pids;
        }
    }
    malformed
}

fn stats_failure(reason: String) -> OrchestratorError {
    OrchestratorError::StageFailed {
        stage: Stage::StatsCollected,
        reason,
    }
}

/// Inspect and sample `containers` on `context`.
///
/// An inspect failure is an error. A failed resource sample still yields the
/// inspect data together with a warning.
pub async fn collect(
    executor: &CommandExecutor,
    context: &str,
    containers: &[String],
    timeout: Duration,
) -> Result<(StatsSnapshot, Vec<String>), OrchestratorError> {
    if containers.is_empty() {
        return Ok((StatsSnapshot::empty(), Vec::new()));
    }

    let output = executor
        .docker(context, docker::inspect(containers), None, timeout)
        .await?;
    if !output.is_success() {
        return Err(stats_failure(format!(
            "docker inspect failed: {}",
            output.describe_failure()
        )));
    }
    let mut stats = parse_inspect(&output.stdout)
        .map_err(|e| stats_failure(format!("unreadable inspect output: {}", e)))?;

    let mut warnings = Vec::new();
    match executor
        .docker(context, docker::stats(containers), None, timeout)
        .await
    {
        Ok(output) if output.is_success() => {
            let malformed = merge_stats(&mut stats, &output.stdout);
            if malformed > 0 {
                warnings.push(format!("{} unreadable stats line(s) skipped", malformed));
            }
        }
        Ok(output) => warnings.push(format!(
            "docker stats failed: {}",
            output.describe_failure()
        )),
        Err(e) => warnings.push(format!("docker stats failed: {}", e)),
    }

    for warning in &warnings {
        warn!("[{}] {}", context, warning);
    }

    Ok((
        StatsSnapshot {
            collected_at: Utc::now(),
            containers: stats,
        },
        warnings,
    ))
}
