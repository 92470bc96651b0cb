//! # Tests for Handlers
//!
//! Router-level tests driving requests through the full middleware stack.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::jobs::WalletJobPayload;
use crate::server::{AppState, create_app};

const TOKEN: &str = "tick-secret";

async fn test_state() -> AppState {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("create in-memory db");
    Migrator::up(&db, None).await.expect("apply migrations");

    let config = AppConfig {
        profile: "test".to_string(),
        trigger_tokens: vec![TOKEN.to_string()],
        ..Default::default()
    };
    AppState::build(config, db).expect("state builds")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn tick_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/internal/wallet-sync/tick");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> axum::response::Response {
    app.oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_root_returns_service_info() {
    let app = create_app(test_state().await);
    let response = send(app, Request::get("/").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "wallet-sync");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_healthz_reports_database_ok() {
    let app = create_app(test_state().await);
    let response = send(app, Request::get("/healthz").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_tick_without_token_is_problem_json_401() {
    let app = create_app(test_state().await);
    let response = send(app, tick_request(None)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["trace_id"].is_string());
}

#[tokio::test]
async fn test_tick_with_wrong_token_is_401() {
    let app = create_app(test_state().await);
    let response = send(app, tick_request(Some("nope"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tick_on_empty_queue_returns_zero_summary() {
    let app = create_app(test_state().await);
    let response = send(app, tick_request(Some(TOKEN))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["processed"], 0);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_tick_processes_due_jobs() {
    let state = test_state().await;
    state
        .worker
        .queue()
        .enqueue(&WalletJobPayload::google_patch("obj-1", 50))
        .await
        .unwrap();

    // No Google credentials in the test profile: the attempt fails and is retried.
    let response = send(create_app(state), tick_request(Some(TOKEN))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["retried"], 1);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = create_app(test_state().await);
    let request = Request::get("/")
        .header("x-request-id", "req-abc-1")
        .body(Body::empty())
        .unwrap();
    let response = send(app, request).await;

    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-abc-1");
}

#[tokio::test]
async fn test_openapi_document_lists_tick_route() {
    let app = create_app(test_state().await);
    let response = send(app, Request::get("/openapi.json").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/internal/wallet-sync/tick"]["post"].is_object());
}
