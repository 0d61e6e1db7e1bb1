//! API integration tests.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use podshell::orchestrator::PodPhase;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{Scripted, test_app, wait_ready};

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn ready_session(app: &Router, sessions: &podshell::session::SessionService) -> String {
    let (status, body) = send(app, Method::POST, "/sessions", Some(json!({"user_id": "u1"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["session_id"].as_str().unwrap().to_string();
    wait_ready(sessions, &id, Duration::from_secs(5)).await;
    id
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, _) = test_app();

    let (status, json) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_create_and_get_session() {
    let (app, sessions, _) = test_app();

    let (status, created) =
        send(&app, Method::POST, "/sessions", Some(json!({"user_id": "u1"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "creating");
    assert_eq!(created["ready"], false);
    assert_eq!(created["reconnected"], false);
    assert!(created["pod_name"].as_str().unwrap().starts_with("podshell-"));

    let id = created["session_id"].as_str().unwrap();
    wait_ready(&sessions, id, Duration::from_secs(5)).await;

    let (status, session) = send(&app, Method::GET, &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["id"], id);
    assert_eq!(session["status"], "running");
    assert_eq!(session["ready"], true);
    assert_eq!(session["user_id"], "u1");
    assert_eq!(session["terminal_attached"], false);
    assert!(session["uptime_seconds"].is_u64());

    let (status, list) = send(&app, Method::GET, "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconnect_returns_ok() {
    let (app, sessions, _) = test_app();
    let id = ready_session(&app, &sessions).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(json!({"user_id": "u1", "reconnect": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reconnected"], true);
    assert_eq!(body["session_id"], id.as_str());
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let (app, _, _) = test_app();

    let (status, body) = send(&app, Method::GET, "/sessions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(&app, Method::DELETE, "/sessions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::POST, "/sessions/nope/activity", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_when_cluster_down_is_503() {
    let (app, _, fake) = test_app();
    fake.set_ping_fails(true);

    let (status, body) = send(&app, Method::POST, "/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert!(body["details"].as_str().unwrap().contains("connection refused"));
    assert!(!body["troubleshooting"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_session() {
    let (app, sessions, fake) = test_app();
    let id = ready_session(&app, &sessions).await;

    let (status, body) = send(&app, Method::DELETE, &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deleted");
    assert_eq!(fake.deleted().len(), 1);

    let (status, _) = send(&app, Method::GET, &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_activity_returns_no_content() {
    let (app, sessions, _) = test_app();
    let id = ready_session(&app, &sessions).await;

    let (status, body) =
        send(&app, Method::POST, &format!("/sessions/{}/activity", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_exec_command() {
    let (app, sessions, fake) = test_app();
    fake.respond("uname", Scripted::ok("Linux\n"));
    fake.respond("exit 3", Scripted::fail("bad things\n", 3));
    let id = ready_session(&app, &sessions).await;
    let uri = format!("/sessions/{}/exec", id);

    let (status, body) = send(&app, Method::POST, &uri, Some(json!({"command": "uname"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "Linux\n");

    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({"command": "uname", "capture_output": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "");

    let (status, body) = send(&app, Method::POST, &uri, Some(json!({"command": "exit 3"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["details"], "bad things");

    let (status, body) = send(&app, Method::POST, &uri, Some(json!({"command": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_exec_before_ready_is_conflict() {
    let (app, _, fake) = test_app();
    fake.set_phases(&[PodPhase::Pending]);

    let (_, created) = send(&app, Method::POST, "/sessions", Some(json!({}))).await;
    let id = created["session_id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/exec", id),
        Some(json!({"command": "ls"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_save_sync_and_run() {
    let (app, sessions, fake) = test_app();
    fake.respond("python3 -u", Scripted::ok("42\n"));
    let id = ready_session(&app, &sessions).await;

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/sessions/{}/files", id),
        Some(json!({"path": "main.py", "content": "print(42)\n"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "main.py");
    assert_eq!(body["bytes"], 10);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/workspace/sync", id),
        Some(json!({"items": [
            {"path": "lib", "type": "folder"},
            {"path": "lib/util.py", "type": "file", "content": "X = 1\n"},
            {"path": "../oops.py", "type": "file", "content": ""}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synced"], 2);
    assert_eq!(body["failed"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/run", id),
        Some(json!({"path": "main.py"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "captured");
    assert_eq!(body["output"], "42\n");
    assert_eq!(body["success"], true);

    let (_, session) = send(&app, Method::GET, &format!("/sessions/{}", id), None).await;
    assert_eq!(session["current_file"], "main.py");
}

#[tokio::test]
async fn test_terminal_input_without_terminal_is_conflict() {
    let (app, sessions, _) = test_app();
    let id = ready_session(&app, &sessions).await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/terminal/input", id),
        Some(json!({"command": "ls"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_orchestrator_health() {
    let (app, _, fake) = test_app();

    let (status, body) = send(&app, Method::GET, "/health/orchestrator", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["namespace"], "podshell");

    fake.set_ping_fails(true);
    let (status, body) = send(&app, Method::GET, "/health/orchestrator", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["healthy"], false);
    assert_eq!(body["cluster"]["ok"], false);
    assert!(!body["troubleshooting"].as_array().unwrap().is_empty());
}
