//! HTTP surface, driven through the router with `tower::ServiceExt::oneshot`.

use automation_core::config::EngineConfig;
use automation_core::server::build_router;
use automation_core::AutomationEngine;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> Router {
    let engine = AutomationEngine::new(EngineConfig::default());
    engine.init().await.unwrap();
    build_router(Arc::new(engine))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

fn ticket_definition() -> Value {
    json!({
        "entity_type": "ticket",
        "initial_state": "OPEN",
        "states": ["OPEN", "IN_PROGRESS", "CLOSED"],
        "transitions": [
            {"from": ["OPEN"], "event": "start", "to": "IN_PROGRESS"},
            {"from": ["OPEN", "IN_PROGRESS"], "event": "close", "to": "CLOSED"}
        ]
    })
}

#[tokio::test]
async fn healthz() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn workflow_lifecycle_over_http() {
    let app = app().await;

    let (status, _) = send(&app, Method::PUT, "/api/workflows/support", Some(ticket_definition())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/api/workflows/support", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("support"));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/workflows/support/instances",
        Some(json!({"entity_id": "T-1", "data": {"priority": "high"}, "actor_id": "agent-7"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["current_state"], json!("OPEN"));

    let (status, body) = send(&app, Method::GET, "/api/workflows/support/instances/T-1/transitions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/workflows/support/instances/T-1/transitions/start",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], json!(true));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/workflows/support/instances/T-1/transitions",
        Some(json!({"event": "start", "actor_id": "agent-7", "data": {"note": "on it"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_state"], json!("IN_PROGRESS"));
    assert_eq!(body["version"], json!(2));

    let (status, body) = send(&app, Method::GET, "/api/workflows/support/instances/T-1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[1]["context"], json!({"note": "on it"}));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let app = app().await;
    send(&app, Method::PUT, "/api/workflows/support", Some(ticket_definition())).await;
    send(
        &app,
        Method::POST,
        "/api/workflows/support/instances",
        Some(json!({"entity_id": "T-1"})),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/workflows/support/instances/T-1/transitions",
        Some(json!({"event": "reopen"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], json!("invalid_transition"));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/workflows/support/instances",
        Some(json!({"entity_id": "T-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Method::GET, "/api/workflows/support/instances/T-404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("not_found"));

    let mut broken = ticket_definition();
    broken["initial_state"] = json!("LIMBO");
    let (status, body) = send(&app, Method::PUT, "/api/workflows/broken", Some(broken)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], json!("definition_error"));
}

#[tokio::test]
async fn rules_and_events_over_http() {
    let app = app().await;

    let rule = json!({
        "name": "escalate",
        "trigger": "ticket.updated",
        "priority": 3,
        "condition": {
            "operator": "AND",
            "conditions": [
                {"field": "priority", "operator": "equals", "value": "high"},
                {"field": "age_hours", "operator": "greater_than", "value": 24}
            ]
        },
        "actions": [{"type": "log", "params": {"level": "warn", "message": "escalating"}}]
    });
    let (status, _) = send(&app, Method::POST, "/api/rules", Some(rule)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/events/ticket.updated",
        Some(json!({"priority": "high", "age_hours": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["status"], json!("executed"));

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/rules/escalate/enabled",
        Some(json!({"enabled": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], json!(false));

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/events/ticket.updated",
        Some(json!({"priority": "high", "age_hours": 30})),
    )
    .await;
    assert_eq!(body[0]["status"], json!("disabled"));

    let (status, body) = send(&app, Method::GET, "/api/rules", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rules"].as_array().unwrap().len(), 1);

    let bad_rule = json!({
        "name": "bad",
        "trigger": "ticket.updated",
        "actions": [{"type": "teleport"}]
    });
    let (status, body) = send(&app, Method::POST, "/api/rules", Some(bad_rule)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], json!("validation_error"));
}
