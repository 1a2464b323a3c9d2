//! Deployment scheduler tests

use std::time::Duration;

use dockfleet::deploy::scheduler::{CancelOutcome, RemovalOutcome};
use dockfleet::errors::OrchestratorError;
use dockfleet::exec::CommandOutput;
use dockfleet::models::job::{DeploymentRequest, JobState};

use crate::common::{
    harness, harness_with, FakeTransport, Harness, Reply, ScriptedRunner, COMPOSE_SPEC,
};

fn slow_bring_up(delay_ms: u64) -> ScriptedRunner {
    ScriptedRunner::healthy().on(
        &["compose", "up"],
        Reply::Delay(Duration::from_millis(delay_ms), CommandOutput::success("")),
    )
}

async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn state_of(h: &Harness, id: &str) -> JobState {
    h.state.scheduler.status(id).unwrap().state().clone()
}

#[tokio::test]
async fn test_jobs_on_one_context_run_back_to_back() {
    let h = harness(slow_bring_up(100), FakeTransport::new());
    h.ready("nuc1").await;

    let first = h.submit("nuc1");
    let second = h.submit("nuc1");

    let first = h.state.scheduler.wait(&first).await.unwrap();
    let second = h.state.scheduler.wait(&second).await.unwrap();
    assert_eq!(first.state(), &JobState::Succeeded);
    assert_eq!(second.state(), &JobState::Succeeded);

    // The second job only left Received after the first one finished
    assert!(second.started_at.unwrap() >= first.finished_at.unwrap());

    let prunes = h.runner.positions(&["network", "prune"]);
    let first_stats = h.runner.positions(&["stats"])[0];
    assert_eq!(prunes.len(), 2);
    assert!(prunes[1] > first_stats);
}

#[tokio::test]
async fn test_identical_submissions_run_independently() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let first = h.submit("nuc1");
    h.state.scheduler.wait(&first).await.unwrap();
    let second = h.submit("nuc1");
    let second_job = h.state.scheduler.wait(&second).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(second_job.state(), &JobState::Succeeded);
    assert!(second_job
        .fsm
        .history()
        .contains(&JobState::NetworkPruned));
    assert_eq!(h.runner.calls_matching(&["network", "prune"]).len(), 2);
    assert_eq!(h.runner.calls_matching(&["compose", "up"]).len(), 2);
}

#[tokio::test]
async fn test_at_most_one_active_job_per_context() {
    let h = harness(slow_bring_up(200), FakeTransport::new());
    h.ready("nuc1").await;

    let first = h.submit("nuc1");
    let second = h.submit("nuc1");

    wait_until("first job to deploy", || state_of(&h, &first) == JobState::Deploying).await;

    assert_eq!(h.state.scheduler.active_job("nuc1"), Some(first.clone()));
    assert_eq!(h.state.scheduler.queued_jobs("nuc1"), 1);
    assert_eq!(state_of(&h, &second), JobState::Received);

    h.state.scheduler.wait(&second).await.unwrap();
    wait_until("worker to go idle", || h.state.scheduler.active_job("nuc1").is_none()).await;
    assert_eq!(h.state.scheduler.queued_jobs("nuc1"), 0);
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    let h = harness(slow_bring_up(20), FakeTransport::new());
    h.ready("nuc1").await;

    let ids: Vec<String> = (0..3)
        .map(|i| {
            let mut request = DeploymentRequest::new("nuc1", COMPOSE_SPEC);
            request.compose_args = Some(vec![format!("--marker-{}", i)]);
            h.state.scheduler.submit(request).unwrap()
        })
        .collect();

    for id in &ids {
        h.state.scheduler.wait(id).await.unwrap();
    }

    let markers: Vec<String> = h
        .runner
        .calls_matching(&["compose", "up"])
        .into_iter()
        .filter_map(|call| call.args.last().cloned())
        .collect();
    assert_eq!(markers, vec!["--marker-0", "--marker-1", "--marker-2"]);
}

#[tokio::test]
async fn test_contexts_deploy_concurrently() {
    let h = harness(slow_bring_up(300), FakeTransport::new());
    h.ready("nuc1").await;
    h.ready("nuc2").await;

    let a = h.submit("nuc1");
    let b = h.submit("nuc2");

    wait_until("both jobs to deploy at once", || {
        state_of(&h, &a) == JobState::Deploying && state_of(&h, &b) == JobState::Deploying
    })
    .await;

    h.state.scheduler.wait(&a).await.unwrap();
    h.state.scheduler.wait(&b).await.unwrap();

    let contexts: Vec<Option<String>> = h
        .runner
        .calls_matching(&["compose", "up"])
        .into_iter()
        .map(|call| call.context)
        .collect();
    assert!(contexts.contains(&Some("nuc1".to_string())));
    assert!(contexts.contains(&Some("nuc2".to_string())));
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let h = harness(slow_bring_up(150), FakeTransport::new());
    h.ready("nuc1").await;

    let first = h.submit("nuc1");
    let second = h.submit("nuc1");

    assert_eq!(h.state.scheduler.cancel(&second).unwrap(), CancelOutcome::Cancelled);
    assert_eq!(state_of(&h, &second), JobState::Cancelled);

    let first = h.state.scheduler.wait(&first).await.unwrap();
    assert_eq!(first.state(), &JobState::Succeeded);
    assert_eq!(h.runner.calls_matching(&["compose", "up"]).len(), 1);
}

#[tokio::test]
async fn test_submit_rejects_unknown_or_unready_context() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.register("nuc1", "10.0.0.5");

    let unknown = h.state.scheduler.submit(DeploymentRequest::new("ghost", COMPOSE_SPEC));
    assert!(matches!(unknown, Err(OrchestratorError::ContextNotFound(_))));

    let pending = h.state.scheduler.submit(DeploymentRequest::new("nuc1", COMPOSE_SPEC));
    assert!(matches!(
        pending,
        Err(OrchestratorError::ContextNotReady { state, .. }) if state == "pending"
    ));

    assert!(h.state.scheduler.jobs().is_empty());
}

#[tokio::test]
async fn test_unknown_job() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    assert!(matches!(
        h.state.scheduler.status("nope"),
        Err(OrchestratorError::JobNotFound(_))
    ));
    assert!(matches!(
        h.state.scheduler.cancel("nope"),
        Err(OrchestratorError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_idle_context() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let outcome = h.state.scheduler.remove_context("nuc1").await.unwrap();
    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(h.state.registry.get("nuc1").is_err());

    let unbind = h.runner.calls_matching(&["context", "rm"]);
    assert_eq!(unbind.len(), 1);
    assert!(unbind[0].has(&["nuc1"]));

    let again = h.state.scheduler.remove_context("nuc1").await;
    assert!(matches!(again, Err(OrchestratorError::ContextNotFound(_))));
}

#[tokio::test]
async fn test_removal_waits_for_queued_jobs() {
    let h = harness(slow_bring_up(150), FakeTransport::new());
    h.ready("nuc1").await;

    let first = h.submit("nuc1");
    let second = h.submit("nuc1");

    let outcome = h.state.scheduler.remove_context("nuc1").await.unwrap();
    assert_eq!(outcome, RemovalOutcome::Deferred);
    assert!(h.state.registry.get("nuc1").unwrap().removal_pending);

    // No new work is accepted while the removal is pending
    let late = h.state.scheduler.submit(DeploymentRequest::new("nuc1", COMPOSE_SPEC));
    assert!(matches!(late, Err(OrchestratorError::ContextNotReady { .. })));

    for id in [&first, &second] {
        let job = h.state.scheduler.wait(id).await.unwrap();
        assert_eq!(job.state(), &JobState::Succeeded);
    }

    wait_until("context removal", || h.state.registry.get("nuc1").is_err()).await;
    wait_until("docker context removal", || {
        !h.runner.calls_matching(&["context", "rm"]).is_empty()
    })
    .await;

    let compose_file = h.state.layout.compose_file("nuc1");
    for _ in 0..200 {
        if !compose_file.exists().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!compose_file.exists().await);
}

#[tokio::test]
async fn test_finished_jobs_are_evicted_oldest_first() {
    let h = harness_with(ScriptedRunner::healthy(), FakeTransport::new(), |options| {
        options.scheduler.max_finished_jobs = 2
    });
    h.ready("nuc1").await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = h.submit("nuc1");
        h.state.scheduler.wait(&id).await.unwrap();
        ids.push(id);
    }

    wait_until("oldest job eviction", || h.state.scheduler.status(&ids[0]).is_err()).await;
    assert!(h.state.scheduler.status(&ids[1]).is_ok());
    assert!(h.state.scheduler.status(&ids[2]).is_ok());
    assert_eq!(h.state.scheduler.jobs().len(), 2);
}

#[tokio::test]
async fn test_shutdown_stops_pending_work() {
    let h = harness(slow_bring_up(100), FakeTransport::new());
    h.ready("nuc1").await;

    let first = h.submit("nuc1");
    let second = h.submit("nuc1");
    wait_until("first job to deploy", || state_of(&h, &first) == JobState::Deploying).await;

    h.state.shutdown(&h.options).await;

    assert_eq!(state_of(&h, &first), JobState::Cancelled);
    assert_eq!(state_of(&h, &second), JobState::Cancelled);
    assert_eq!(h.runner.calls_matching(&["compose", "up"]).len(), 1);
}
