//! Deployment scheduler
//!
//! Each context owns a FIFO queue drained by a single worker task, so at most
//! one job per context is ever past `Received`, while jobs for different
//! contexts run concurrently. A worker exits once its queue is empty and a new
//! one is spawned by the next submission.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::fsm::JobEvent;
use crate::deploy::pipeline::{DeploymentPipeline, JobHandle};
use crate::errors::OrchestratorError;
use crate::exec::CommandExecutor;
use crate::models::job::{DeploymentJob, DeploymentRequest, StatsSnapshot, UpdateFilesRequest};
use crate::registry::ContextRegistry;
use crate::utils::generate_uuid;

/// Scheduler options
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Terminal jobs kept for `status()`; the oldest are evicted first
    pub max_finished_jobs: usize,

    /// Timeout of `docker context rm` when a context is removed
    pub unbind_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_finished_jobs: 500,
            unbind_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was still queued and will never run
    Cancelled,

    /// The job is running and stops at its next stage boundary
    CancelRequested,
}

/// Result of a context removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed,

    /// Jobs are still queued; the context goes once they finish
    Deferred,
}

#[derive(Default)]
struct ContextQueue {
    pending: VecDeque<Arc<JobHandle>>,
    active: Option<Arc<JobHandle>>,
}

struct Inner {
    options: SchedulerOptions,
    registry: Arc<ContextRegistry>,
    executor: Arc<CommandExecutor>,
    pipeline: Arc<DeploymentPipeline>,

    // A context has an entry exactly while its worker is running
    queues: Mutex<HashMap<String, ContextQueue>>,
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    finished: Mutex<VecDeque<String>>,
}

/// Accepts deployment requests and runs them per context
#[derive(Clone)]
pub struct DeploymentScheduler {
    inner: Arc<Inner>,
}

impl DeploymentScheduler {
    pub fn new(
        options: SchedulerOptions,
        registry: Arc<ContextRegistry>,
        executor: Arc<CommandExecutor>,
        pipeline: Arc<DeploymentPipeline>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                registry,
                executor,
                pipeline,
                queues: Mutex::new(HashMap::new()),
                jobs: RwLock::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Queue a deployment and return its job id.
    ///
    /// Fails without creating a job when the context is unknown, not `Ready`
    /// or being removed.
    pub fn submit(&self, request: DeploymentRequest) -> Result<String, OrchestratorError> {
        let context_name = request.context_name.clone();
        self.enqueue(&context_name, |id| DeploymentJob::new(id, request))
    }

    /// Queue file updates against the context's running containers.
    ///
    /// They wait behind deployments already queued for the context, like any
    /// other job.
    pub fn submit_file_update(
        &self,
        request: UpdateFilesRequest,
    ) -> Result<String, OrchestratorError> {
        if request.file_updates.is_empty() {
            return Err(OrchestratorError::ParseError(
                "file update request carries no updates".to_string(),
            ));
        }
        let context_name = request.context_name.clone();
        self.enqueue(&context_name, |id| DeploymentJob::file_update(id, request))
    }

    fn enqueue<F>(&self, context_name: &str, build: F) -> Result<String, OrchestratorError>
    where
        F: FnOnce(String) -> DeploymentJob,
    {
        let mut queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
        let ctx = self.inner.registry.get(context_name).map_err(|e| match e {
            OrchestratorError::NotFound(name) => OrchestratorError::ContextNotFound(name),
            other => other,
        })?;
        if !ctx.is_ready() {
            return Err(OrchestratorError::ContextNotReady {
                name: ctx.name,
                state: ctx.state.to_string(),
            });
        }
        if ctx.removal_pending {
            return Err(OrchestratorError::ContextNotReady {
                name: ctx.name,
                state: "removal pending".to_string(),
            });
        }

        let id = generate_uuid();
        let job = build(id.clone());
        let kind = job.kind;
        let handle = Arc::new(JobHandle::new(job));
        self.inner
            .jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), handle.clone());

        let spawn_worker = !queues.contains_key(context_name);
        let queue = queues.entry(context_name.to_string()).or_default();
        queue.pending.push_back(handle);
        debug!(
            "Queued {} job {} for {} ({} waiting)",
            kind.as_str(),
            id,
            context_name,
            queue.pending.len()
        );

        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner, context_name.to_string()));
        }

        Ok(id)
    }

    /// Snapshot of a job
    pub fn status(&self, id: &str) -> Result<DeploymentJob, OrchestratorError> {
        self.handle(id).map(|handle| handle.snapshot())
    }

    /// All retained jobs, oldest submission first
    pub fn jobs(&self) -> Vec<DeploymentJob> {
        let mut jobs: Vec<DeploymentJob> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|handle| handle.snapshot())
            .collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        jobs
    }

    /// Wait for a job to reach a terminal state
    pub async fn wait(&self, id: &str) -> Result<DeploymentJob, OrchestratorError> {
        let handle = self.handle(id)?;
        Ok(handle.wait().await)
    }

    /// Cancel a queued job, or ask a running one to stop at its next stage
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, OrchestratorError> {
        let handle = self.handle(id)?;

        let mut queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_terminal() {
            return Err(OrchestratorError::JobFinished(id.to_string()));
        }

        handle.request_cancel();

        let queued = queues
            .get_mut(handle.context_name())
            .and_then(|queue| {
                queue
                    .pending
                    .iter()
                    .position(|h| h.id() == id)
                    .and_then(|pos| queue.pending.remove(pos))
            })
            .is_some();
        drop(queues);

        if queued {
            handle.transition(JobEvent::Cancel)?;
            self.inner.record_finished(id);
            info!("Cancelled queued job {}", id);
            Ok(CancelOutcome::Cancelled)
        } else {
            info!("Cancellation requested for running job {}", id);
            Ok(CancelOutcome::CancelRequested)
        }
    }

    /// Id of the job currently executing against `context`
    pub fn active_job(&self, context: &str) -> Option<String> {
        let queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get(context)
            .and_then(|queue| queue.active.as_ref())
            .map(|handle| handle.id().to_string())
    }

    /// Jobs waiting behind the active one for `context`
    pub fn queued_jobs(&self, context: &str) -> usize {
        let queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(context).map_or(0, |queue| queue.pending.len())
    }

    /// Remove a context now, or once its queued jobs have finished
    pub async fn remove_context(&self, name: &str) -> Result<RemovalOutcome, OrchestratorError> {
        let ctx = {
            let queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
            let ctx = self.inner.registry.get(name).map_err(|e| match e {
                OrchestratorError::NotFound(name) => OrchestratorError::ContextNotFound(name),
                other => other,
            })?;

            if queues.contains_key(name) {
                self.inner.registry.mark_for_removal(name)?;
                info!("Removal of context {} deferred until its jobs finish", name);
                return Ok(RemovalOutcome::Deferred);
            }

            self.inner.registry.remove(name)?;
            ctx
        };

        if ctx.is_ready() {
            self.inner.unbind(name).await;
        }
        self.inner.forget(name).await;
        info!("Removed context {}", name);
        Ok(RemovalOutcome::Removed)
    }

    /// Stats snapshot of a context's compose project.
    ///
    /// Read-only, so it is not queued behind running jobs.
    pub async fn inspect(
        &self,
        context: &str,
    ) -> Result<(StatsSnapshot, Vec<String>), OrchestratorError> {
        self.inner.pipeline.inspect(context).await
    }

    /// Cancel queued jobs, ask running ones to stop and wait up to `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        let active: Vec<Arc<JobHandle>> = {
            let queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues
                .values()
                .flat_map(|queue| queue.active.iter().chain(queue.pending.iter()))
                .cloned()
                .collect()
        };

        for handle in &active {
            if let Err(e) = self.cancel(handle.id()) {
                debug!("Skipping cancel of {}: {}", handle.id(), e);
            }
        }

        let waits = active.iter().map(|handle| handle.wait());
        if tokio::time::timeout(timeout, futures::future::join_all(waits))
            .await
            .is_err()
        {
            warn!("Running jobs did not stop within {:?}", timeout);
        }
    }

    fn handle(&self, id: &str) -> Result<Arc<JobHandle>, OrchestratorError> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))
    }
}

impl Inner {
    /// Remember a terminal job and evict the oldest beyond the retention limit
    fn record_finished(&self, id: &str) {
        let evicted: Vec<String> = {
            let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
            finished.push_back(id.to_string());
            let excess = finished.len().saturating_sub(self.options.max_finished_jobs);
            finished.drain(..excess).collect()
        };

        if !evicted.is_empty() {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            for id in &evicted {
                jobs.remove(id);
            }
            debug!("Evicted {} finished job(s)", evicted.len());
        }
    }

    async fn unbind(&self, name: &str) {
        match self.executor.unbind(name, self.options.unbind_timeout).await {
            Ok(output) if output.is_success() => debug!("Removed docker context {}", name),
            Ok(output) => warn!(
                "Failed to remove docker context {}: {}",
                name,
                output.describe_failure()
            ),
            Err(e) => warn!("Failed to remove docker context {}: {}", name, e),
        }
    }

    async fn forget(&self, name: &str) {
        if let Err(e) = self.pipeline.forget(name).await {
            warn!("Failed to clear deployment files of {}: {}", name, e);
        }
        if let Err(e) = self.executor.forget_host(name).await {
            warn!("Failed to remove ssh host of {}: {}", name, e);
        }
    }

    /// Drop a context flagged for removal once its queue has drained
    async fn finalize_removal(&self, context: &str) {
        let ready = match self.registry.get(context) {
            Ok(ctx) if ctx.removal_pending => ctx.is_ready(),
            _ => return,
        };

        if let Err(e) = self.registry.remove(context) {
            warn!("Deferred removal of {} failed: {}", context, e);
            return;
        }
        if ready {
            self.unbind(context).await;
        }
        self.forget(context).await;
        info!("Removed context {} after its jobs finished", context);
    }
}

/// Worker flow of one context: run queued jobs in submission order
async fn drain(inner: Arc<Inner>, context: String) {
    debug!("Worker for {} starting", context);

    loop {
        let next = {
            let mut queues = inner.queues.lock().unwrap_or_else(|e| e.into_inner());
            let Some(queue) = queues.get_mut(&context) else {
                return;
            };
            match queue.pending.pop_front() {
                Some(handle) => {
                    queue.active = Some(handle.clone());
                    Some(handle)
                }
                None => {
                    queues.remove(&context);
                    None
                }
            }
        };

        let Some(handle) = next else {
            break;
        };

        inner.pipeline.run(&handle).await;

        {
            let mut queues = inner.queues.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(queue) = queues.get_mut(&context) {
                queue.active = None;
            }
        }
        inner.record_finished(handle.id());
    }

    inner.finalize_removal(&context).await;
    debug!("Worker for {} idle, exiting", context);
}
