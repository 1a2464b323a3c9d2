//! HTTP API tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use dockfleet::server::serve::router;
use dockfleet::server::state::ServerState;

use crate::common::{harness, FakeTransport, Harness, Host, ScriptedRunner, COMPOSE_SPEC};

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::from_app_state(&h.state)))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_and_version() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    let app = app(&h);

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = call(&app, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_add_and_list_contexts() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    let app = app(&h);

    let request = json!({"name": "nuc1", "address": "10.0.0.5", "user": "bf", "credential": "pw"});
    let (status, body) = call(&app, Method::POST, "/contexts", Some(request.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["name"], "nuc1");

    let (status, body) = call(&app, Method::POST, "/contexts", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_name");

    // Provisioning runs in the background
    for _ in 0..200 {
        if h.state.registry.get("nuc1").unwrap().is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = call(&app, Method::GET, "/contexts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["contexts"][0]["state"], "ready");

    // Host details and credentials stay inside the orchestrator
    let rendered = body.to_string();
    assert!(!rendered.contains("10.0.0.5"));
    assert!(!rendered.contains("\"pw\""));
}

#[tokio::test]
async fn test_deploy_and_poll_status() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;
    let app = app(&h);

    let request = json!({"context_name": "nuc1", "compose_spec": COMPOSE_SPEC});
    let (status, body) = call(&app, Method::POST, "/deployments", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    h.state.scheduler.wait(&job_id).await.unwrap();

    let (status, body) = call(&app, Method::GET, &format!("/deployments/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "succeeded");
    assert_eq!(body["containers"], json!(["app-web-1"]));
    assert_eq!(body["stats_snapshot"]["containers"][0]["name"], "app-web-1");

    let (status, body) = call(&app, Method::GET, "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/deployments/{}/cancel", job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "job_finished");

    let (status, body) = call(&app, Method::GET, "/contexts/nuc1/inspect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"], "nuc1");
}

#[tokio::test]
async fn test_deploy_errors_map_to_status_codes() {
    let h = harness(
        ScriptedRunner::healthy(),
        FakeTransport::new().host("10.0.0.9", Host::AuthRejected),
    );
    h.register("broken", "10.0.0.9");
    h.state.provisioner.provision("broken").await.unwrap();
    let app = app(&h);

    let unknown = json!({"context_name": "ghost", "compose_spec": COMPOSE_SPEC});
    let (status, body) = call(&app, Method::POST, "/deployments", Some(unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "context_not_found");

    let failed = json!({"context_name": "broken", "compose_spec": COMPOSE_SPEC});
    let (status, body) = call(&app, Method::POST, "/deployments", Some(failed)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "context_not_ready");

    let bad_mode = json!({
        "context_name": "broken",
        "compose_spec": COMPOSE_SPEC,
        "file_updates": [{"container": "web", "path": "/x", "content": "", "mode": "append"}]
    });
    let (status, _) = call(&app, Method::POST, "/deployments", Some(bad_mode)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::GET, "/deployments/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remove_context() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;
    let app = app(&h);

    let (status, body) = call(&app, Method::DELETE, "/contexts/nuc1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "removed");

    let (status, _) = call(&app, Method::DELETE, "/contexts/nuc1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_files_route() {
    let h = harness(ScriptedRunner::healthy(), FakeTransport::new());
    h.ready("nuc1").await;
    let app = app(&h);

    let request = json!({"file_updates": [
        {"container": "app-web-1", "path": "/etc/app/config.json", "content": "{\"debug\": true}",
         "mode": "merge_json", "merge_schema": {"mergeStrategy": "objectMerge"}}
    ]});
    let (status, body) = call(&app, Method::POST, "/contexts/nuc1/files", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    h.state.scheduler.wait(&job_id).await.unwrap();

    let (status, body) = call(&app, Method::GET, &format!("/deployments/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "file_update");
    assert_eq!(body["state"], "succeeded");
    assert_eq!(body["file_updates"], json!(["app-web-1:/etc/app/config.json"]));

    let empty = json!({"file_updates": []});
    let (status, body) = call(&app, Method::POST, "/contexts/nuc1/files", Some(empty)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "parse_error");

    let misplaced_schema = json!({"file_updates": [
        {"container": "app-web-1", "path": "/etc/motd", "content": "hi", "merge_schema": {}}
    ]});
    let (status, _) = call(&app, Method::POST, "/contexts/nuc1/files", Some(misplaced_schema)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let one = json!({"file_updates": [{"container": "web", "path": "/x", "content": ""}]});
    let (status, body) = call(&app, Method::POST, "/contexts/ghost/files", Some(one)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "context_not_found");
}
