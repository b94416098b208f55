// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Security tests for scheduler task handlers.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use dd_dispatch::middleware::tasks_auth::TASK_TOKEN_HEADER;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

fn task_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header(TASK_TOKEN_HEADER, token);
    }
    builder
        .body(Body::from(json!({ "event_id": "formal" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_dispatch_cycle_no_header_forbidden() {
    let app = common::create_test_app();

    let response = app
        .router
        .oneshot(task_request("/tasks/dispatch-cycle", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dispatch_cycle_wrong_token_forbidden() {
    let app = common::create_test_app();

    let response = app
        .router
        .oneshot(task_request("/tasks/dispatch-cycle", Some("test_tasks_secreT")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_jwt_does_not_open_tasks() {
    let app = common::create_test_app();
    let token = common::create_test_jwt(
        "chair",
        dd_dispatch::middleware::auth::Role::Admin,
        &app.state.config.jwt_signing_key,
    );

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tasks/monitor-sweep")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(json!({ "event_id": "formal" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dispatch_cycle_with_token_allowed() {
    let app = common::create_test_app();
    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();
    app.state
        .rides
        .request_ride("formal", "senior", false, None)
        .await
        .unwrap();

    // Surrounding whitespace is tolerated.
    let response = app
        .router
        .clone()
        .oneshot(task_request(
            "/tasks/dispatch-cycle",
            Some(" test_tasks_secret "),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["event_id"], "formal");
    assert_eq!(report["assignments"].as_array().unwrap().len(), 1);
    assert_eq!(report["stopped_on"]["outcome"], "queue_empty");
}

#[tokio::test]
async fn test_monitor_sweep_with_token_allowed() {
    let app = common::create_test_app();
    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();

    let response = app
        .router
        .oneshot(task_request("/tasks/monitor-sweep", Some("test_tasks_secret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["drivers_checked"], 1);
    assert_eq!(report["inactivity_alerts"], 0);
}

#[tokio::test]
async fn test_task_payload_validated() {
    let app = common::create_test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tasks/monitor-sweep")
                .header("content-type", "application/json")
                .header(TASK_TOKEN_HEADER, "test_tasks_secret")
                .body(Body::from(json!({ "event_id": "" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
