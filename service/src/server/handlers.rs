//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models as api;
use tracing::{info, warn};

use crate::deploy::scheduler::{CancelOutcome, RemovalOutcome};
use crate::errors::OrchestratorError;
use crate::models::context::{Credential, Endpoint, ExecutionContext};
use crate::models::job::{
    DeploymentJob, DeploymentRequest, FileUpdate, FileUpdateMode, MountFile, StatsSnapshot,
    UpdateFilesRequest,
};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error wrapper mapping orchestrator errors onto HTTP responses
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::ContextNotFound(_) => (StatusCode::NOT_FOUND, "context_not_found"),
            OrchestratorError::JobNotFound(_) => (StatusCode::NOT_FOUND, "job_not_found"),
            OrchestratorError::DuplicateName(_) => (StatusCode::CONFLICT, "duplicate_name"),
            OrchestratorError::ContextNotReady { .. } => (StatusCode::CONFLICT, "context_not_ready"),
            OrchestratorError::JobFinished(_) => (StatusCode::CONFLICT, "job_finished"),
            OrchestratorError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_transition")
            }
            OrchestratorError::ParseError(_) => (StatusCode::BAD_REQUEST, "parse_error"),
            OrchestratorError::ConfigError(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            OrchestratorError::ExecutionTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, "execution_timeout")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = api::ErrorResponse {
            error: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ================================ CONVERSIONS ================================== //

fn context_summary(ctx: ExecutionContext) -> api::ContextSummary {
    api::ContextSummary {
        name: ctx.name,
        state: ctx.state.to_string(),
        last_error: ctx.last_error,
        removal_pending: ctx.removal_pending,
    }
}

fn stats_snapshot(snapshot: StatsSnapshot) -> api::StatsSnapshot {
    api::StatsSnapshot {
        collected_at: snapshot.collected_at,
        containers: snapshot
            .containers
            .into_iter()
            .map(|c| api::ContainerStatus {
                name: c.name,
                image: c.image,
                status: c.status,
                health: c.health,
                restart_count: c.restart_count,
                started_at: c.started_at,
                cpu_percent: c.cpu_percent,
                mem_usage: c.mem_usage,
                mem_percent: c.mem_percent,
                net_io: c.net_io,
                block_io: c.block_io,
                pids: c.pids,
            })
            .collect(),
    }
}

fn job_status(job: DeploymentJob) -> api::JobStatusResponse {
    let (failure_stage, failure_reason) = match job.failure() {
        Some((stage, reason)) => (Some(stage.to_string()), Some(reason.to_string())),
        None => (None, None),
    };

    api::JobStatusResponse {
        kind: job.kind.as_str().to_string(),
        state: job.state().name().to_string(),
        failure_stage,
        failure_reason,
        cancel_requested: job.cancel_requested,
        history: job
            .fsm
            .history()
            .iter()
            .map(|s| s.name().to_string())
            .collect(),
        compose_log: job.result.compose_log.map(|log| api::ComposeLog {
            exit_code: log.exit_code,
            stdout: log.stdout,
            stderr: log.stderr,
        }),
        containers: job.result.containers,
        file_updates: job.result.file_updates,
        stats_snapshot: job.result.stats.map(stats_snapshot),
        warnings: job.result.warnings,
        submitted_at: job.submitted_at,
        started_at: job.started_at,
        finished_at: job.finished_at,
        job_id: job.id,
        context_name: job.context_name,
    }
}

fn parse_mode(mode: Option<&str>) -> Result<FileUpdateMode, OrchestratorError> {
    match mode {
        None | Some("replace") => Ok(FileUpdateMode::Replace),
        Some("merge_json") => Ok(FileUpdateMode::MergeJson),
        Some(other) => Err(OrchestratorError::ParseError(format!(
            "unknown file update mode '{}'",
            other
        ))),
    }
}

fn file_updates(
    updates: Vec<api::FileUpdateRequest>,
) -> Result<Vec<FileUpdate>, OrchestratorError> {
    updates
        .into_iter()
        .map(|u| {
            let mode = parse_mode(u.mode.as_deref())?;
            if u.merge_schema.is_some() && mode != FileUpdateMode::MergeJson {
                return Err(OrchestratorError::ParseError(format!(
                    "merge_schema on {} needs mode merge_json",
                    u.path
                )));
            }
            Ok(FileUpdate {
                mode,
                merge_schema: u.merge_schema,
                container: u.container,
                path: u.path,
                content: u.content,
            })
        })
        .collect()
}

fn deployment_request(body: api::DeployRequest) -> Result<DeploymentRequest, OrchestratorError> {
    let file_updates = file_updates(body.file_updates)?;

    let mounts = body
        .mounts
        .into_iter()
        .map(|(placeholder, m)| {
            (
                placeholder,
                MountFile {
                    source: m.source,
                    content: m.content,
                },
            )
        })
        .collect();

    Ok(DeploymentRequest {
        context_name: body.context_name,
        compose_spec: body.compose_spec,
        file_updates,
        mounts,
        compose_args: body.compose_args,
    })
}

// ================================== HANDLERS =================================== //

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(api::HealthResponse {
        status: "healthy".to_string(),
        service: "dockfleet".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(api::VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// List contexts in registration order
pub async fn list_contexts_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let contexts: Vec<api::ContextSummary> =
        state.registry.list().into_iter().map(context_summary).collect();
    let total = contexts.len();
    Json(api::ContextListResponse { contexts, total })
}

/// Register a context and provision it in the background
pub async fn add_context_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<api::AddContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.registry.register(
        &body.name,
        Endpoint::new(body.address, body.ssh_port, body.user),
        Credential::parse(&body.credential),
    )?;

    info!("Context {} added, provisioning", ctx.name);
    // Outcome is reported through the context state
    drop(state.provisioner.spawn(ctx.name.clone()));

    Ok((StatusCode::ACCEPTED, Json(context_summary(ctx))))
}

/// Remove a context, deferred while it has queued jobs
pub async fn remove_context_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.scheduler.remove_context(&name).await?;
    let (status, outcome) = match outcome {
        RemovalOutcome::Removed => (StatusCode::OK, "removed"),
        RemovalOutcome::Deferred => (StatusCode::ACCEPTED, "deferred"),
    };
    Ok((
        status,
        Json(api::RemoveContextResponse {
            name,
            outcome: outcome.to_string(),
        }),
    ))
}

/// Container snapshot of the context's last deployment
pub async fn inspect_context_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (snapshot, warnings) = state.scheduler.inspect(&name).await?;
    Ok(Json(api::InspectResponse {
        context: name,
        snapshot: stats_snapshot(snapshot),
        warnings,
    }))
}

/// Accept a deployment request
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<api::DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = deployment_request(body)?;
    let job_id = state.scheduler.submit(request)?;
    Ok((StatusCode::ACCEPTED, Json(api::DeployResponse { job_id })))
}

/// Queue file updates against a context without redeploying
pub async fn update_files_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(body): Json<api::UpdateFilesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = UpdateFilesRequest {
        context_name: name,
        file_updates: file_updates(body.file_updates)?,
    };
    let job_id = state.scheduler.submit_file_update(request)?;
    Ok((StatusCode::ACCEPTED, Json(api::DeployResponse { job_id })))
}

/// List retained jobs
pub async fn list_jobs_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let jobs: Vec<api::JobStatusResponse> =
        state.scheduler.jobs().into_iter().map(job_status).collect();
    let total = jobs.len();
    Json(api::JobListResponse { jobs, total })
}

/// Status of one job
pub async fn job_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.scheduler.status(&id)?;
    Ok(Json(job_status(job)))
}

/// Cancel a queued or running job
pub async fn cancel_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = match state.scheduler.cancel(&id)? {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::CancelRequested => "cancel_requested",
    };
    Ok(Json(api::CancelResponse {
        job_id: id,
        outcome: outcome.to_string(),
    }))
}
