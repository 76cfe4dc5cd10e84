//! HTTP API integration tests
//!
//! Requests go through `handle_request` against a `MemoryStore`-backed
//! state, covering signup/login, task CRUD, completion and points.

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pomodoro_server::server::handle_request;
use pomodoro_server::store::MemoryStore;
use pomodoro_server::{AppState, Args};

fn state() -> Arc<AppState> {
    let args = Args::try_parse_from([
        "pomodoro-server",
        "--jwt-secret",
        "integration-test-secret-0123456789abcdef",
    ])
    .unwrap();
    Arc::new(AppState::new(args, Arc::new(MemoryStore::new())).unwrap())
}

async fn call(
    state: &Arc<AppState>,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = body.map(|b| Bytes::from(b.to_string())).unwrap_or_default();
    let req = builder.body(Full::new(body)).unwrap();

    let response = handle_request(Arc::clone(state), req).await;
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Phone numbers are unique per user
static NEXT_PHONE: AtomicU64 = AtomicU64::new(5_550_000_000);

async fn signup(state: &Arc<AppState>, email: &str) -> String {
    let phone = format!("{:010}", NEXT_PHONE.fetch_add(1, Ordering::Relaxed));
    let (status, body) = call(
        state,
        Method::POST,
        "/users/signup",
        None,
        Some(json!({
            "name": "Grace",
            "email": email,
            "password": "Sup3r-secret!",
            "confirmPassword": "Sup3r-secret!",
            "phone": phone,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["token"].as_str().unwrap().to_string()
}

async fn create_task(state: &Arc<AppState>, token: &str, text: &str) -> String {
    let (status, body) = call(
        state,
        Method::POST,
        "/tasks",
        Some(token),
        Some(json!({ "text": text, "priority": "high", "endTime": "17:30" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["_id"].as_str().unwrap().to_string()
}

// =============================================================================
// Users
// =============================================================================

#[tokio::test]
async fn test_signup_then_login() {
    let state = state();
    signup(&state, "Grace@Example.com").await;

    let (status, body) = call(
        &state,
        Method::POST,
        "/users/login",
        None,
        Some(json!({ "email": "grace@example.com", "password": "Sup3r-secret!" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert!(body["token"].is_string());
    assert!(body["data"].get("passwordHash").is_none());

    let (status, body) = call(
        &state,
        Method::POST,
        "/users/login",
        None,
        Some(json!({ "email": "grace@example.com", "password": "Wrong-pass!" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_duplicate_signup_rejected() {
    let state = state();
    signup(&state, "dup@example.com").await;

    let (status, body) = call(
        &state,
        Method::POST,
        "/users/signup",
        None,
        Some(json!({
            "name": "Again",
            "email": "dup@example.com",
            "password": "Sup3r-secret!",
            "confirmPassword": "Sup3r-secret!",
            "phone": "9876543210",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User with this email already exists");
}

#[tokio::test]
async fn test_duplicate_phone_reported_as_phone() {
    let state = state();
    let body = |email: &str| {
        json!({
            "name": "Phone",
            "email": email,
            "password": "Sup3r-secret!",
            "confirmPassword": "Sup3r-secret!",
            "phone": "5559990000",
        })
    };

    let (status, _) = call(
        &state,
        Method::POST,
        "/users/signup",
        None,
        Some(body("one@example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, reply) = call(
        &state,
        Method::POST,
        "/users/signup",
        None,
        Some(body("two@example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let message = reply["message"].as_str().unwrap();
    assert!(message.contains("phone number"), "{message}");
    assert!(!message.contains("email"), "{message}");
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let state = state();
    let (status, body) = call(&state, Method::GET, "/tasks", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid access token");
}

// =============================================================================
// Tasks and completion
// =============================================================================

#[tokio::test]
async fn test_complete_task_credits_points() {
    let state = state();
    let token = signup(&state, "worker@example.com").await;
    let task_id = create_task(&state, &token, "Deep work").await;

    let (status, body) = call(
        &state,
        Method::PATCH,
        &format!("/tasks/{task_id}/complete"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Pomodoro marked as completed");

    let data = &body["data"];
    assert_eq!(data["task"]["completed"], true);
    assert_eq!(data["task"]["progress"], 100);
    assert_eq!(data["points"]["points"], 20);
    assert_eq!(data["points"]["level"], 1);
    assert_eq!(data["points"]["streak"], 0);
    assert_eq!(data["streakBonus"], 0);
    assert_eq!(data["levelUp"], false);

    let (status, body) = call(&state, Method::GET, "/points", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"], false);
    assert_eq!(body["data"]["ledger"]["points"], 20);
}

#[tokio::test]
async fn test_points_created_on_first_read() {
    let state = state();
    let token = signup(&state, "reader@example.com").await;

    let (status, body) = call(&state, Method::GET, "/points", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["ledger"]["points"], 0);
    assert_eq!(body["data"]["ledger"]["level"], 1);
}

#[tokio::test]
async fn test_complete_unknown_or_malformed_task_is_404() {
    let state = state();
    let token = signup(&state, "lost@example.com").await;

    let (status, body) = call(
        &state,
        Method::PATCH,
        "/tasks/not-an-id/complete",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Pomodoro task not found");

    let task_id = create_task(&state, &token, "short-lived").await;
    let (status, _) = call(
        &state,
        Method::DELETE,
        &format!("/tasks/{task_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &state,
        Method::PATCH,
        &format!("/tasks/{task_id}/complete"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // No completion happened, so no ledger was written
    let (_, body) = call(&state, Method::GET, "/points", Some(&token), None).await;
    assert_eq!(body["data"]["created"], true);
}

#[tokio::test]
async fn test_tasks_are_scoped_to_owner() {
    let state = state();
    let owner = signup(&state, "owner@example.com").await;
    let other = signup(&state, "other@example.com").await;
    let task_id = create_task(&state, &owner, "private").await;

    let (status, _) = call(
        &state,
        Method::GET,
        &format!("/tasks/{task_id}"),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&state, Method::GET, "/tasks", Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_progress_out_of_range() {
    let state = state();
    let token = signup(&state, "progress@example.com").await;
    let task_id = create_task(&state, &token, "halfway").await;

    let (status, _) = call(
        &state,
        Method::PATCH,
        &format!("/tasks/{task_id}/progress"),
        Some(&token),
        Some(json!({ "progress": 101 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &state,
        Method::PATCH,
        &format!("/tasks/{task_id}/progress"),
        Some(&token),
        Some(json!({ "progress": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["progress"], 50);
}

#[tokio::test]
async fn test_deadline_needs_lead_time() {
    let state = state();
    let token = signup(&state, "deadline@example.com").await;
    let task_id = create_task(&state, &token, "soon").await;

    let too_soon = chrono::Utc::now() + chrono::Duration::minutes(2);
    let (status, body) = call(
        &state,
        Method::PATCH,
        &format!("/tasks/{task_id}/deadline"),
        Some(&token),
        Some(json!({ "deadline": too_soon.to_rfc3339() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Deadline must be at least 5 minutes in the future");

    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    let (status, _) = call(
        &state,
        Method::PATCH,
        &format!("/tasks/{task_id}/deadline"),
        Some(&token),
        Some(json!({ "deadline": later.to_rfc3339() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_leaderboard_positions() {
    let state = state();
    let first = signup(&state, "first@example.com").await;
    signup(&state, "second@example.com").await;

    let (status, body) = call(&state, Method::GET, "/users", Some(&first), None).await;
    assert_eq!(status, StatusCode::OK);
    let users = body["data"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["position"], 1);
    assert_eq!(users[1]["position"], 2);
}
