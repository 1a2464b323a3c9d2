//! Deployment pipeline
//!
//! Runs one job through validate, prune, bring-up, file updates and stats
//! collection, or through file updates alone for jobs that only touch
//! running containers. Every stage outcome is fed to the job's FSM;
//! cancellation is honoured only between stages so a running remote command
//! always finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::deploy::fsm::JobEvent;
use crate::deploy::{compose, docker, files, stats};
use crate::errors::OrchestratorError;
use crate::exec::CommandExecutor;
use crate::models::job::{DeploymentJob, JobKind, JobResult, JobState, Stage, StatsSnapshot};
use crate::storage::layout::StorageLayout;

/// Pipeline timeouts and compose defaults
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub prune_timeout: Duration,
    pub deploy_timeout: Duration,
    pub file_timeout: Duration,
    pub stats_timeout: Duration,
    pub mount_timeout: Duration,

    /// `compose up` arguments for requests that supply none
    pub default_compose_args: Vec<String>,

    /// Fail bring-up when fewer containers than services exist afterwards
    pub verify_container_count: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prune_timeout: Duration::from_secs(60),
            deploy_timeout: Duration::from_secs(600),
            file_timeout: Duration::from_secs(30),
            stats_timeout: Duration::from_secs(30),
            mount_timeout: Duration::from_secs(30),
            default_compose_args: docker::DEFAULT_COMPOSE_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            verify_container_count: true,
        }
    }
}

/// Shared, observable state of one job
pub struct JobHandle {
    id: String,
    context_name: String,
    job: RwLock<DeploymentJob>,
    cancel: AtomicBool,
    state_tx: watch::Sender<JobState>,
}

impl JobHandle {
    pub fn new(job: DeploymentJob) -> Self {
        let (state_tx, _) = watch::channel(job.state().clone());
        Self {
            id: job.id.clone(),
            context_name: job.context_name.clone(),
            job: RwLock::new(job),
            cancel: AtomicBool::new(false),
            state_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    /// Consistent copy of the job
    pub fn snapshot(&self) -> DeploymentJob {
        self.job.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn state(&self) -> JobState {
        self.job
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .state()
            .clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Ask the job to stop at the next stage boundary
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.job
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_requested = true;
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Feed `event` to the job FSM and publish the new state
    pub fn transition(&self, event: JobEvent) -> Result<JobState, OrchestratorError> {
        let state = {
            let mut job = self.job.write().unwrap_or_else(|e| e.into_inner());
            let state = job
                .fsm
                .process(event)
                .map_err(OrchestratorError::Internal)?
                .clone();
            if state.is_terminal() {
                job.finished_at = Some(Utc::now());
            }
            state
        };

        self.state_tx.send_replace(state.clone());
        Ok(state)
    }

    pub fn mark_started(&self) {
        self.job
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .started_at = Some(Utc::now());
    }

    pub fn update_result<F>(&self, f: F)
    where
        F: FnOnce(&mut JobResult),
    {
        let mut job = self.job.write().unwrap_or_else(|e| e.into_inner());
        f(&mut job.result);
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state_tx.subscribe()
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait(&self) -> DeploymentJob {
        let mut rx = self.subscribe();
        loop {
            if rx.borrow_and_update().is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.snapshot()
    }
}

fn stage_failed(stage: Stage, reason: impl Into<String>) -> OrchestratorError {
    OrchestratorError::StageFailed {
        stage,
        reason: reason.into(),
    }
}

/// Failure text recorded on the job; the stage is tracked by the FSM
fn failure_reason(err: &OrchestratorError) -> String {
    match err {
        OrchestratorError::StageFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Executes deployment jobs against their contexts
pub struct DeploymentPipeline {
    executor: Arc<CommandExecutor>,
    layout: StorageLayout,
    settings: PipelineSettings,
}

impl DeploymentPipeline {
    pub fn new(
        executor: Arc<CommandExecutor>,
        layout: StorageLayout,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            executor,
            layout,
            settings,
        }
    }

    /// Run the job to a terminal state
    pub async fn run(&self, handle: &JobHandle) -> JobState {
        handle.mark_started();
        info!("[{}] Starting job {}", handle.context_name(), handle.id());

        if let Err(e) = self.execute(handle).await {
            let reason = failure_reason(&e);
            match handle.transition(JobEvent::Fail(reason)) {
                Ok(state) => error!("[{}] Job {} {}", handle.context_name(), handle.id(), state),
                Err(err) => error!("[{}] Job {}: {} ({})", handle.context_name(), handle.id(), e, err),
            }
        }

        let state = handle.state();
        info!("[{}] Job {} finished: {}", handle.context_name(), handle.id(), state.name());
        state
    }

    /// Applies a pending cancel request, returns whether the job stopped
    fn cancelled(&self, handle: &JobHandle) -> Result<bool, OrchestratorError> {
        if !handle.is_cancel_requested() {
            return Ok(false);
        }
        handle.transition(JobEvent::Cancel)?;
        info!("[{}] Job {} cancelled", handle.context_name(), handle.id());
        Ok(true)
    }

    async fn execute(&self, handle: &JobHandle) -> Result<(), OrchestratorError> {
        let job = handle.snapshot();
        match job.kind {
            JobKind::Deployment => self.deploy(handle, &job).await,
            JobKind::FileUpdate => self.update_files(handle, &job).await,
        }
    }

    /// File updates against running containers, no redeploy
    async fn update_files(
        &self,
        handle: &JobHandle,
        job: &DeploymentJob,
    ) -> Result<(), OrchestratorError> {
        let context = job.context_name.as_str();

        // Received
        if self.cancelled(handle)? {
            return Ok(());
        }
        self.executor.ensure_ready(context)?;
        handle.transition(JobEvent::UpdatesAccepted)?;

        // FilesUpdated
        if self.cancelled(handle)? {
            return Ok(());
        }
        self.push_files(handle, job).await?;
        handle.transition(JobEvent::UpdatesApplied)?;
        Ok(())
    }

    async fn push_files(&self, handle: &JobHandle, job: &DeploymentJob) -> Result<(), OrchestratorError> {
        for update in &job.file_updates {
            let applied = files::apply(
                &self.executor,
                &job.context_name,
                update,
                self.settings.file_timeout,
            )
            .await?;
            handle.update_result(|r| r.file_updates.push(applied));
        }
        Ok(())
    }

    async fn deploy(&self, handle: &JobHandle, job: &DeploymentJob) -> Result<(), OrchestratorError> {
        let context = job.context_name.as_str();

        // Received
        if self.cancelled(handle)? {
            return Ok(());
        }
        let (services, rendered) = self.validate(job)?;
        handle.transition(JobEvent::Validated)?;

        // NetworkPruned
        if self.cancelled(handle)? {
            return Ok(());
        }
        self.prune(handle, context).await?;
        handle.transition(JobEvent::Pruned)?;

        // Deploying
        if self.cancelled(handle)? {
            return Ok(());
        }
        let containers = self.bring_up(handle, job, &rendered, services.len()).await?;
        let has_file_updates = !job.file_updates.is_empty();
        handle.transition(JobEvent::BroughtUp { has_file_updates })?;

        // FilesUpdated
        if has_file_updates {
            if self.cancelled(handle)? {
                return Ok(());
            }
            self.push_files(handle, job).await?;
            handle.transition(JobEvent::FilesPushed)?;
        }

        // StatsCollected
        if self.cancelled(handle)? {
            return Ok(());
        }
        self.collect_stats(handle, context, &containers).await;
        handle.transition(JobEvent::StatsGathered)?;
        Ok(())
    }

    /// Context is ready and the compose spec is usable; returns the service
    /// names and the compose document with mount placeholders substituted
    fn validate(&self, job: &DeploymentJob) -> Result<(Vec<String>, String), OrchestratorError> {
        self.executor.ensure_ready(&job.context_name)?;
        let services = compose::validate(&job.compose_spec)?;
        let rendered = compose::apply_mounts(&job.compose_spec, &job.mounts)?;
        Ok((services, rendered))
    }

    async fn prune(&self, handle: &JobHandle, context: &str) -> Result<(), OrchestratorError> {
        let output = self
            .executor
            .docker(context, docker::network_prune(), None, self.settings.prune_timeout)
            .await?;

        if output.is_success() {
            return Ok(());
        }

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if docker::is_nothing_to_prune(&combined) {
            warn!("[{}] Network prune had nothing to prune", context);
            handle.update_result(|r| {
                r.warnings
                    .push(format!("network prune: {}", output.describe_failure()))
            });
            return Ok(());
        }

        Err(stage_failed(
            Stage::NetworkPruned,
            format!("network prune failed: {}", output.describe_failure()),
        ))
    }

    async fn bring_up(
        &self,
        handle: &JobHandle,
        job: &DeploymentJob,
        rendered: &str,
        service_count: usize,
    ) -> Result<Vec<String>, OrchestratorError> {
        let context = job.context_name.as_str();

        for mount in job.mounts.values() {
            let output = self
                .executor
                .write_host_file(context, &mount.source, &mount.content, self.settings.mount_timeout)
                .await?;
            if !output.is_success() {
                return Err(stage_failed(
                    Stage::Deploying,
                    format!("failed to stage {}: {}", mount.source, output.describe_failure()),
                ));
            }
        }

        let compose_file = self.layout.compose_file(context);
        compose_file.write_string(rendered).await?;
        let file = compose_file.path().display().to_string();
        let project = compose::project_name(context);

        let extra = job
            .compose_args
            .as_ref()
            .unwrap_or(&self.settings.default_compose_args);
        let output = self
            .executor
            .docker(
                context,
                docker::compose_up(&project, &file, extra),
                None,
                self.settings.deploy_timeout,
            )
            .await?;
        handle.update_result(|r| r.compose_log = Some(output.clone()));

        if !output.is_success() {
            return Err(stage_failed(
                Stage::Deploying,
                format!("compose up failed: {}", output.describe_failure()),
            ));
        }

        let containers = self
            .list_containers(context, &project, &file, Stage::Deploying)
            .await?;
        if self.settings.verify_container_count && containers.len() < service_count {
            return Err(stage_failed(
                Stage::Deploying,
                format!(
                    "invalid container creation count: {} service(s), {} container(s)",
                    service_count,
                    containers.len()
                ),
            ));
        }

        handle.update_result(|r| r.containers = containers.clone());
        Ok(containers)
    }

    async fn list_containers(
        &self,
        context: &str,
        project: &str,
        file: &str,
        stage: Stage,
    ) -> Result<Vec<String>, OrchestratorError> {
        let output = self
            .executor
            .docker(
                context,
                docker::compose_ps_names(project, file),
                None,
                self.settings.stats_timeout,
            )
            .await?;
        if !output.is_success() {
            return Err(stage_failed(
                stage,
                format!("listing containers failed: {}", output.describe_failure()),
            ));
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Best-effort: a failure leaves an empty snapshot and a warning
    async fn collect_stats(&self, handle: &JobHandle, context: &str, containers: &[String]) {
        match stats::collect(&self.executor, context, containers, self.settings.stats_timeout).await {
            Ok((snapshot, warnings)) => handle.update_result(|r| {
                r.stats = Some(snapshot);
                r.warnings.extend(warnings);
            }),
            Err(e) => {
                warn!("[{}] Stats collection failed for job {}: {}", context, handle.id(), e);
                handle.update_result(|r| {
                    r.stats = Some(StatsSnapshot::empty());
                    r.warnings
                        .push(format!("stats collection failed: {}", failure_reason(&e)));
                });
            }
        }
    }

    /// Drop the stored compose document of a removed context
    pub async fn forget(&self, context: &str) -> Result<(), OrchestratorError> {
        self.layout.context_dir(context).delete().await
    }

    /// Snapshot of the containers of the last deployment to `context`
    pub async fn inspect(
        &self,
        context: &str,
    ) -> Result<(StatsSnapshot, Vec<String>), OrchestratorError> {
        self.executor.ensure_ready(context)?;

        let compose_file = self.layout.compose_file(context);
        if !compose_file.exists().await {
            return Err(OrchestratorError::NotFound(format!(
                "no deployment recorded for context {}",
                context
            )));
        }

        let file = compose_file.path().display().to_string();
        let containers = self
            .list_containers(
                context,
                &compose::project_name(context),
                &file,
                Stage::StatsCollected,
            )
            .await?;
        stats::collect(&self.executor, context, &containers, self.settings.stats_timeout).await
    }
}
