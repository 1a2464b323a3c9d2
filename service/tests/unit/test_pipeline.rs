//! Deployment pipeline tests, driven through the scheduler

use std::collections::BTreeMap;
use std::time::Duration;

use dockfleet::deploy::scheduler::CancelOutcome;
use dockfleet::errors::OrchestratorError;
use dockfleet::exec::CommandOutput;
use dockfleet::models::job::{
    DeploymentJob, DeploymentRequest, FileUpdate, JobKind, JobState, MountFile, Stage,
    UpdateFilesRequest,
};

use crate::common::{harness, FakeTransport, Harness, Reply, ScriptedRunner, COMPOSE_SPEC};

async fn deploy(h: &Harness, request: DeploymentRequest) -> DeploymentJob {
    let id = h.state.scheduler.submit(request).unwrap();
    tokio::time::timeout(Duration::from_secs(5), h.state.scheduler.wait(&id))
        .await
        .expect("job did not finish")
        .unwrap()
}

async fn wait_for_state(h: &Harness, id: &str, state: JobState) {
    for _ in 0..400 {
        if h.state.scheduler.status(id).unwrap().state() == &state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached {:?}", id, state);
}

fn history(job: &DeploymentJob) -> Vec<&'static str> {
    job.fsm.history().iter().map(|s| s.name()).collect()
}

#[tokio::test]
async fn test_successful_deployment() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    assert_eq!(job.state(), &JobState::Succeeded);
    assert_eq!(
        history(&job),
        vec!["received", "network_pruned", "deploying", "stats_collected", "succeeded"]
    );
    assert_eq!(job.result.containers, vec!["app-web-1"]);
    assert!(job.result.warnings.is_empty(), "{:?}", job.result.warnings);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    let stats = job.result.stats.unwrap();
    assert_eq!(stats.containers.len(), 1);
    assert_eq!(stats.containers[0].status.as_deref(), Some("running"));
    assert_eq!(stats.containers[0].cpu_percent.as_deref(), Some("0.12%"));

    // Every docker command is bound to the job's context
    let up = h.runner.calls_matching(&["compose", "up"]);
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].context.as_deref(), Some("nuc1"));
    assert!(up[0].has(&["--detach", "--force-recreate", "--quiet-pull"]));

    let compose_file = h.state.layout.compose_file("nuc1");
    assert_eq!(compose_file.read_string().await.unwrap(), COMPOSE_SPEC);
}

#[tokio::test]
async fn test_failed_bring_up_skips_stats() {
    let runner = ScriptedRunner::healthy().on(
        &["compose", "up"],
        Reply::fail(1, "pull access denied for private/app"),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::Deploying);
    assert!(reason.contains("pull access denied"), "{}", reason);

    let log = job.result.compose_log.as_ref().unwrap();
    assert_eq!(log.exit_code, 1);
    assert!(log.stderr.contains("pull access denied"));

    assert!(!history(&job).contains(&"stats_collected"));
    assert!(h.runner.calls_matching(&["inspect"]).is_empty());
    assert!(h.runner.calls_matching(&["stats"]).is_empty());
}

#[tokio::test]
async fn test_stats_timeout_is_downgraded_to_warning() {
    let runner = ScriptedRunner::healthy().on(&["inspect"], Reply::Timeout);
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    assert_eq!(job.state(), &JobState::Succeeded);
    assert!(job.result.stats.as_ref().unwrap().is_empty());
    assert_eq!(job.result.warnings.len(), 1);
    assert!(job.result.warnings[0].starts_with("stats collection failed"));
}

#[tokio::test]
async fn test_failed_resource_sample_keeps_inspect_data() {
    let runner = ScriptedRunner::healthy().on(&["stats"], Reply::fail(1, "daemon busy"));
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    assert_eq!(job.state(), &JobState::Succeeded);
    let stats = job.result.stats.unwrap();
    assert_eq!(stats.containers.len(), 1);
    assert!(stats.containers[0].cpu_percent.is_none());
    assert!(job.result.warnings[0].contains("daemon busy"));
}

#[tokio::test]
async fn test_nothing_to_prune_is_tolerated() {
    let runner = ScriptedRunner::healthy().on(
        &["network", "prune"],
        Reply::Output(CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error: nothing to prune".to_string(),
        }),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    assert_eq!(job.state(), &JobState::Succeeded);
    assert!(job.result.warnings[0].starts_with("network prune"));
}

#[tokio::test]
async fn test_prune_failure_aborts() {
    let runner = ScriptedRunner::healthy().on(
        &["network", "prune"],
        Reply::fail(1, "Cannot connect to the Docker daemon"),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::NetworkPruned);
    assert!(reason.contains("Cannot connect"));
    assert!(h.runner.calls_matching(&["compose", "up"]).is_empty());
}

#[tokio::test]
async fn test_invalid_compose_spec_fails_before_any_command() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", "version: '3'\n")).await;

    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::Received);
    assert!(reason.contains("services"), "{}", reason);
    assert!(h.runner.calls_matching(&["network", "prune"]).is_empty());
}

#[tokio::test]
async fn test_missing_containers_fail_bring_up() {
    let runner = ScriptedRunner::healthy().on(&["compose", "ps"], Reply::ok(""));
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::Deploying);
    assert!(reason.contains("invalid container creation count"));
}

#[tokio::test]
async fn test_compose_args_override_defaults() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let mut request = DeploymentRequest::new("nuc1", COMPOSE_SPEC);
    request.compose_args = Some(vec!["--build".to_string()]);
    deploy(&h, request).await;

    let up = &h.runner.calls_matching(&["compose", "up"])[0];
    assert!(up.has(&["--build"]));
    assert!(!up.has(&["--force-recreate"]));
}

#[tokio::test]
async fn test_file_updates_replace_and_merge() {
    let runner = ScriptedRunner::healthy().on(
        &["exec", "cat", "/etc/app/config.json"],
        Reply::ok(r#"{"server": {"port": 80}, "workers": 2}"#),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let mut request = DeploymentRequest::new("nuc1", COMPOSE_SPEC);
    request.file_updates = vec![
        FileUpdate::replace("app-web-1", "/etc/app/motd", "hello\n"),
        FileUpdate::merge_json("app-web-1", "/etc/app/config.json", r#"{"server": {"tls": true}}"#),
    ];

    let job = deploy(&h, request).await;

    assert_eq!(job.state(), &JobState::Succeeded);
    assert!(history(&job).contains(&"files_updated"));
    assert_eq!(
        job.result.file_updates,
        vec!["app-web-1:/etc/app/motd", "app-web-1:/etc/app/config.json"]
    );

    let writes = h.runner.calls_matching(&["exec", "-i"]);
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].stdin.as_deref(), Some("hello\n"));

    let merged: serde_json::Value =
        serde_json::from_str(writes[1].stdin.as_deref().unwrap()).unwrap();
    assert_eq!(
        merged,
        serde_json::json!({"server": {"port": 80, "tls": true}, "workers": 2})
    );
}

#[tokio::test]
async fn test_failed_file_update_fails_job() {
    let runner = ScriptedRunner::healthy().on(&["exec", "-i"], Reply::fail(126, "read-only file system"));
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let mut request = DeploymentRequest::new("nuc1", COMPOSE_SPEC);
    request.file_updates = vec![FileUpdate::replace("app-web-1", "/etc/motd", "hi")];

    let job = deploy(&h, request).await;

    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::FilesUpdated);
    assert!(reason.contains("read-only file system"));
}

#[tokio::test]
async fn test_mounts_are_staged_and_substituted() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let spec = "services:\n  web:\n    image: nginx:alpine\n    volumes:\n      - ${NGINX_CONF}:/etc/nginx/nginx.conf:ro\n";
    let mut request = DeploymentRequest::new("nuc1", spec);
    request.mounts = BTreeMap::from([(
        "${NGINX_CONF}".to_string(),
        MountFile {
            source: "/opt/fleet/nginx.conf".to_string(),
            content: "events {}\n".to_string(),
        },
    )]);

    let job = deploy(&h, request).await;
    assert_eq!(job.state(), &JobState::Succeeded);

    let staged = h.runner.calls_matching(&["ssh"]);
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].stdin.as_deref(), Some("events {}\n"));
    assert!(staged[0].args.last().unwrap().contains("/opt/fleet/nginx.conf"));

    let rendered = h.state.layout.compose_file("nuc1").read_string().await.unwrap();
    assert!(rendered.contains("/opt/fleet/nginx.conf:/etc/nginx/nginx.conf:ro"));
    assert!(!rendered.contains("${NGINX_CONF}"));
}

#[tokio::test]
async fn test_cancel_running_job_stops_at_next_stage() {
    let runner = ScriptedRunner::healthy().on(
        &["compose", "up"],
        Reply::Delay(Duration::from_millis(200), CommandOutput::success("")),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let id = h.submit("nuc1");
    wait_for_state(&h, &id, JobState::Deploying).await;

    let outcome = h.state.scheduler.cancel(&id).unwrap();
    assert_eq!(outcome, CancelOutcome::CancelRequested);

    let job = h.state.scheduler.wait(&id).await.unwrap();
    assert_eq!(job.state(), &JobState::Cancelled);
    assert!(job.cancel_requested);

    // The running bring-up finished, nothing after it ran
    assert_eq!(h.runner.calls_matching(&["compose", "up"]).len(), 1);
    assert!(h.runner.calls_matching(&["inspect"]).is_empty());

    let again = h.state.scheduler.cancel(&id);
    assert!(matches!(again, Err(OrchestratorError::JobFinished(_))));
}

#[tokio::test]
async fn test_inspect_reads_last_deployment() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let before = h.state.scheduler.inspect("nuc1").await;
    assert!(matches!(before, Err(OrchestratorError::NotFound(_))));

    deploy(&h, DeploymentRequest::new("nuc1", COMPOSE_SPEC)).await;

    let (snapshot, warnings) = h.state.scheduler.inspect("nuc1").await.unwrap();
    assert_eq!(snapshot.containers.len(), 1);
    assert_eq!(snapshot.containers[0].name, "app-web-1");
    assert!(warnings.is_empty());
}

#[tokio::test]
async fn test_merge_into_empty_file_starts_from_empty_object() {
    let runner = ScriptedRunner::healthy().on(&["exec", "cat", "/etc/app/new.json"], Reply::ok(""));
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let mut request = DeploymentRequest::new("nuc1", COMPOSE_SPEC);
    request.file_updates = vec![FileUpdate::merge_json("app-web-1", "/etc/app/new.json", r#"{"a": 1}"#)];

    let job = deploy(&h, request).await;
    assert_eq!(job.state(), &JobState::Succeeded, "{:?}", job.failure());

    let writes = h.runner.calls_matching(&["exec", "-i"]);
    assert_eq!(writes.len(), 1);
    let written: serde_json::Value =
        serde_json::from_str(writes[0].stdin.as_deref().unwrap()).unwrap();
    assert_eq!(written, serde_json::json!({"a": 1}));
}

#[tokio::test]
async fn test_merge_into_missing_file_fails() {
    let runner = ScriptedRunner::healthy().on(
        &["exec", "cat", "/etc/app/gone.json"],
        Reply::fail(1, "cat: can't open '/etc/app/gone.json': No such file or directory"),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let mut request = DeploymentRequest::new("nuc1", COMPOSE_SPEC);
    request.file_updates = vec![FileUpdate::merge_json("app-web-1", "/etc/app/gone.json", "{}")];

    let job = deploy(&h, request).await;
    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::FilesUpdated);
    assert!(reason.contains("No such file"));
    assert!(h.runner.calls_matching(&["exec", "-i"]).is_empty());
}

// ================================= FILE UPDATES ================================= //

async fn update_files(h: &Harness, file_updates: Vec<FileUpdate>) -> DeploymentJob {
    let id = h
        .state
        .scheduler
        .submit_file_update(UpdateFilesRequest {
            context_name: "nuc1".to_string(),
            file_updates,
        })
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), h.state.scheduler.wait(&id))
        .await
        .expect("job did not finish")
        .unwrap()
}

#[tokio::test]
async fn test_file_update_job_skips_compose() {
    let runner = ScriptedRunner::healthy().on(
        &["exec", "cat", "/etc/app/config.json"],
        Reply::ok(r#"{"hosts": ["a"], "workers": 2}"#),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let mut merge = FileUpdate::merge_json("app-web-1", "/etc/app/config.json", r#"{"hosts": ["b"]}"#);
    merge.merge_schema = Some(serde_json::json!({
        "properties": {"hosts": {"mergeStrategy": "append"}}
    }));
    let job = update_files(&h, vec![merge]).await;

    assert_eq!(job.kind, JobKind::FileUpdate);
    assert_eq!(job.state(), &JobState::Succeeded);
    assert_eq!(history(&job), vec!["received", "files_updated", "succeeded"]);
    assert_eq!(job.result.file_updates, vec!["app-web-1:/etc/app/config.json"]);

    let writes = h.runner.calls_matching(&["exec", "-i"]);
    let written: serde_json::Value =
        serde_json::from_str(writes[0].stdin.as_deref().unwrap()).unwrap();
    assert_eq!(written, serde_json::json!({"hosts": ["a", "b"], "workers": 2}));

    assert!(h.runner.calls_matching(&["network", "prune"]).is_empty());
    assert!(h.runner.calls_matching(&["compose", "up"]).is_empty());
}

#[tokio::test]
async fn test_file_update_waits_for_running_deployment() {
    let runner = ScriptedRunner::healthy().on(
        &["compose", "up"],
        Reply::Delay(Duration::from_millis(150), CommandOutput::success("")),
    );
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let deploy_id = h.submit("nuc1");
    wait_for_state(&h, &deploy_id, JobState::Deploying).await;

    let job = update_files(&h, vec![FileUpdate::replace("app-web-1", "/etc/motd", "hi")]).await;
    assert_eq!(job.state(), &JobState::Succeeded);

    let deployed = h.state.scheduler.status(&deploy_id).unwrap();
    assert_eq!(deployed.state(), &JobState::Succeeded);

    // The write ran after the deployment's last docker command
    let write = h.runner.positions(&["exec", "-i"]);
    let stats = h.runner.positions(&["stats"]);
    assert_eq!(write.len(), 1);
    assert!(stats.iter().all(|&i| i < write[0]), "{:?} {:?}", stats, write);
}

#[tokio::test]
async fn test_file_update_without_updates_is_rejected() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;

    let result = h.state.scheduler.submit_file_update(UpdateFilesRequest {
        context_name: "nuc1".to_string(),
        file_updates: Vec::new(),
    });
    assert!(matches!(result, Err(OrchestratorError::ParseError(_))));
}

#[tokio::test]
async fn test_failed_file_update_job_reports_stage() {
    let runner = ScriptedRunner::healthy().on(&["exec", "-i"], Reply::fail(126, "read-only file system"));
    let h = harness(runner, FakeTransport::new());
    h.ready("nuc1").await;

    let job = update_files(&h, vec![FileUpdate::replace("app-web-1", "/etc/motd", "hi")]).await;

    let (stage, reason) = job.failure().unwrap();
    assert_eq!(stage, Stage::FilesUpdated);
    assert!(reason.contains("read-only file system"));
}
