use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use jobtrail_blobstore::BlobStore;
use jobtrail_storage::Database;

use crate::auth::{self, TokenService};
use crate::{applications, companies, documents, reminders, roles, stages, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    tokens: TokenService,
    blob: Option<Arc<BlobStore>>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        tokens: TokenService,
        blob: Option<Arc<BlobStore>>,
    ) -> Self {
        Self {
            metrics,
            storage,
            tokens,
            blob,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn blob(&self) -> Option<&Arc<BlobStore>> {
        self.blob.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/token", post(auth::token))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/profile", get(auth::profile))
        .route(
            "/api/companies",
            get(companies::list).post(companies::create),
        )
        .route(
            "/api/companies/:id",
            get(companies::detail)
                .put(companies::update)
                .delete(companies::remove),
        )
        .route("/api/roles", get(roles::list).post(roles::create))
        .route(
            "/api/roles/:id",
            get(roles::detail).put(roles::update).delete(roles::remove),
        )
        .route(
            "/api/applications",
            get(applications::list).post(applications::create),
        )
        .route("/api/applications/dashboard", get(applications::dashboard))
        .route("/api/applications/stats", get(applications::stats))
        .route(
            "/api/applications/:id",
            get(applications::detail)
                .put(applications::update)
                .delete(applications::remove),
        )
        .route("/api/stages", get(stages::list).post(stages::create))
        .route("/api/stages/upcoming", get(stages::upcoming))
        .route(
            "/api/stages/:id",
            get(stages::detail)
                .put(stages::update)
                .delete(stages::remove),
        )
        .route(
            "/api/documents",
            get(documents::list).post(documents::create),
        )
        .route("/api/documents/presign", post(documents::presign))
        .route(
            "/api/documents/:id",
            get(documents::detail)
                .put(documents::update)
                .delete(documents::remove),
        )
        .route("/api/documents/:id/download", get(documents::download))
        .route(
            "/api/reminders",
            get(reminders::list).post(reminders::create),
        )
        .route("/api/reminders/overdue", get(reminders::overdue))
        .route("/api/reminders/upcoming", get(reminders::upcoming))
        .route("/api/reminders/mark_all_done", post(reminders::mark_all_done))
        .route("/api/reminders/stats", get(reminders::stats))
        .route(
            "/api/reminders/:id",
            get(reminders::detail)
                .put(reminders::update)
                .delete(reminders::remove),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}
