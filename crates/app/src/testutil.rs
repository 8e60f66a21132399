//! Shared helpers for handler tests: an in-memory state and a thin JSON
//! request driver over `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use jobtrail_blobstore::{BlobStore, BlobStoreConfig};
use jobtrail_storage::Database;

use crate::auth::TokenService;
use crate::router::{app_router, AppState};
use crate::telemetry;

pub async fn setup_state() -> AppState {
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = Database::connect("sqlite::memory:?cache=shared")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");
    AppState::new(metrics, database, TokenService::new(b"test-secret"), None)
}

/// Same as [`setup_state`] but with a presign-capable blob store wired in.
pub async fn setup_state_with_blob() -> AppState {
    let blob = Arc::new(BlobStore::new(BlobStoreConfig {
        bucket: "jobtrail-test".to_string(),
        region: "ap-northeast-1".to_string(),
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
    }));
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = Database::connect("sqlite::memory:?cache=shared")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");
    AppState::new(
        metrics,
        database,
        TokenService::new(b"test-secret"),
        Some(blob),
    )
}

pub fn fixed_clock(now: DateTime<Utc>) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
    Arc::new(move || now)
}

/// Sends a request and returns the status with the decoded JSON body.
/// Empty bodies decode to `Value::Null`.
pub async fn send_json(
    app: Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.oneshot(request).await.expect("handler should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

/// Registers a user and returns their access token.
pub async fn register_and_login(state: &AppState, username: &str) -> String {
    let (status, _) = send_json(
        app_router(state.clone()),
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "correct-horse",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, tokens) = send_json(
        app_router(state.clone()),
        "POST",
        "/api/auth/token",
        None,
        Some(json!({ "username": username, "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    tokens["access"].as_str().expect("access token").to_string()
}

/// Creates a company and a role under it, returning the role id.
pub async fn seed_role(state: &AppState, token: &str, company: &str, title: &str) -> i64 {
    let (status, created) = send_json(
        app_router(state.clone()),
        "POST",
        "/api/companies",
        Some(token),
        Some(json!({ "name": company })),
    )
    .await;
    assert!(status.is_success(), "company create failed: {status}");
    let company_id = created["id"].as_i64().expect("company id");

    let (status, role) = send_json(
        app_router(state.clone()),
        "POST",
        "/api/roles",
        Some(token),
        Some(json!({ "company_id": company_id, "title": title })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    role["id"].as_i64().expect("role id")
}

/// Creates an application for the token's user, returning its id.
pub async fn seed_application(state: &AppState, token: &str, role_id: i64) -> i64 {
    let (status, application) = send_json(
        app_router(state.clone()),
        "POST",
        "/api/applications",
        Some(token),
        Some(json!({ "role_id": role_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    application["id"].as_i64().expect("application id")
}
