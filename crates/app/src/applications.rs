//! Application endpoints: owner-scoped CRUD plus the dashboard and stats
//! aggregation views.
//!
//! Detail routes fetch first and run the ownership guard on the loaded row;
//! a denied principal sees the same 404 as a missing id. List and fact
//! queries are additionally scoped to the principal in SQL.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use jobtrail_core::ownership::check_entity;
use jobtrail_core::stats::{self, ApplicationStats};
use jobtrail_core::types::{Application, ApplicationStatus};
use jobtrail_storage::{
    ApplicationError, ApplicationListQuery, ApplicationPatch, ApplicationRow, NewApplication,
};

use crate::auth::AuthUser;
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplicationQuery {
    /// Comma-separated status membership filter.
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationRequest {
    role_id: i64,
    #[serde(default = "default_status")]
    status: ApplicationStatus,
    #[serde(default)]
    source: String,
    #[serde(default)]
    applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deadline_at: Option<DateTime<Utc>>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    notes: String,
}

fn default_status() -> ApplicationStatus {
    ApplicationStatus::Saved
}

#[derive(Debug, Serialize)]
pub struct ApplicationBody {
    #[serde(flatten)]
    application: Application,
    role_title: String,
    company_name: String,
}

impl From<ApplicationRow> for ApplicationBody {
    fn from(row: ApplicationRow) -> Self {
        Self {
            application: row.application,
            role_title: row.role_title,
            company_name: row.company_name,
        }
    }
}

fn parse_statuses(raw: Option<&str>) -> Result<Vec<ApplicationStatus>, ProblemResponse> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut statuses = Vec::new();
    for item in raw.split(',') {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let status = ApplicationStatus::parse(trimmed)
            .map_err(|err| ProblemResponse::validation(err.to_string()))?;
        statuses.push(status);
    }
    Ok(statuses)
}

fn map_application_error(err: ApplicationError) -> ProblemResponse {
    match err {
        ApplicationError::MissingParent => {
            ProblemResponse::validation("referenced role does not exist")
        }
        other => internal_error(other),
    }
}

async fn fetch_owned(
    state: &AppState,
    id: i64,
    user_id: i64,
) -> Result<ApplicationRow, ProblemResponse> {
    let row = state
        .storage()
        .applications()
        .fetch(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    if !check_entity(&row.application, user_id).is_allowed() {
        return Err(ProblemResponse::not_found());
    }
    Ok(row)
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ApplicationQuery>,
) -> Result<Json<Vec<ApplicationBody>>, ProblemResponse> {
    let statuses = parse_statuses(query.status.as_deref())?;
    let rows = state
        .storage()
        .applications()
        .list(
            user_id,
            &ApplicationListQuery {
                statuses,
                priority: query.priority,
                search: query.search,
                ordering: query.ordering,
            },
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(ApplicationBody::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ApplicationRequest>,
) -> Result<(StatusCode, Json<ApplicationBody>), ProblemResponse> {
    let row = state
        .storage()
        .applications()
        .create(NewApplication {
            user_id,
            role_id: body.role_id,
            status: body.status,
            source: &body.source,
            applied_at: body.applied_at,
            deadline_at: body.deadline_at,
            priority: body.priority,
            notes: &body.notes,
            created_at: state.now(),
        })
        .await
        .map_err(map_application_error)?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn detail(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApplicationBody>, ProblemResponse> {
    let row = fetch_owned(&state, id, user_id).await?;
    Ok(Json(row.into()))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ApplicationRequest>,
) -> Result<Json<ApplicationBody>, ProblemResponse> {
    fetch_owned(&state, id, user_id).await?;

    let row = state
        .storage()
        .applications()
        .update(
            id,
            ApplicationPatch {
                role_id: body.role_id,
                status: body.status,
                source: &body.source,
                applied_at: body.applied_at,
                deadline_at: body.deadline_at,
                priority: body.priority,
                notes: &body.notes,
                updated_at: state.now(),
            },
        )
        .await
        .map_err(map_application_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(row.into()))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    fetch_owned(&state, id, user_id).await?;

    state
        .storage()
        .applications()
        .delete(id)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Status histogram over the principal's applications, absent statuses
/// omitted. Accepts the same `status` membership filter as the listing.
pub async fn dashboard(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ApplicationQuery>,
) -> Result<Json<BTreeMap<ApplicationStatus, u64>>, ProblemResponse> {
    let statuses = parse_statuses(query.status.as_deref())?;
    let facts = state
        .storage()
        .applications()
        .list_facts(user_id, &statuses)
        .await
        .map_err(internal_error)?;
    counter!("api_stats_requests_total", "endpoint" => "dashboard").increment(1);
    Ok(Json(stats::dashboard(&facts)))
}

/// Full stats view: zero-filled status counts, 30-day activity, priority
/// buckets and top companies, all relative to the request clock.
pub async fn stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ApplicationStats>, ProblemResponse> {
    let facts = state
        .storage()
        .applications()
        .list_facts(user_id, &[])
        .await
        .map_err(internal_error)?;
    counter!("api_stats_requests_total", "endpoint" => "stats").increment(1);
    Ok(Json(stats::application_stats(&facts, state.now())))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::router::app_router;
    use crate::testutil::{
        register_and_login, seed_application, seed_role, send_json, setup_state,
    };

    #[tokio::test]
    async fn create_defaults_to_saved_and_joins_names() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let role = seed_role(&state, &token, "Acme", "Backend Engineer").await;

        let (status, body) = send_json(
            app_router(state.clone()),
            "POST",
            "/api/applications",
            Some(&token),
            Some(json!({ "role_id": role })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "saved");
        assert_eq!(body["role_title"], "Backend Engineer");
        assert_eq!(body["company_name"], "Acme");
    }

    #[tokio::test]
    async fn other_users_applications_read_as_missing() {
        let state = setup_state().await;
        let ada = register_and_login(&state, "ada").await;
        let kay = register_and_login(&state, "kay").await;
        let role = seed_role(&state, &ada, "Acme", "Backend Engineer").await;
        let id = seed_application(&state, &ada, role).await;

        let (status, _) = send_json(
            app_router(state.clone()),
            "GET",
            &format!("/api/applications/{id}"),
            Some(&kay),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Same surface for update and delete.
        let (status, _) = send_json(
            app_router(state.clone()),
            "DELETE",
            &format!("/api/applications/{id}"),
            Some(&kay),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(
            app_router(state),
            "GET",
            &format!("/api/applications/{id}"),
            Some(&ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_filter_parses_comma_lists_and_rejects_unknowns() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let role = seed_role(&state, &token, "Acme", "Backend Engineer").await;
        for status in ["saved", "applied", "offer"] {
            send_json(
                app_router(state.clone()),
                "POST",
                "/api/applications",
                Some(&token),
                Some(json!({ "role_id": role, "status": status })),
            )
            .await;
        }

        let (status, listed) = send_json(
            app_router(state.clone()),
            "GET",
            "/api/applications?status=applied,offer",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().expect("array").len(), 2);

        let (status, problem) = send_json(
            app_router(state),
            "GET",
            "/api/applications?status=ghosted",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(problem["type"], "validation_failure");
    }

    #[tokio::test]
    async fn update_moves_status_and_touches_updated_at() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let role = seed_role(&state, &token, "Acme", "Backend Engineer").await;
        let id = seed_application(&state, &token, role).await;

        let (status, updated) = send_json(
            app_router(state.clone()),
            "PUT",
            &format!("/api/applications/{id}"),
            Some(&token),
            Some(json!({
                "role_id": role,
                "status": "tech",
                "priority": 3,
                "notes": "phone screen done",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "tech");
        assert_eq!(updated["priority"], 3);
    }

    #[tokio::test]
    async fn dashboard_omits_absent_statuses() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let role = seed_role(&state, &token, "Acme", "Backend Engineer").await;
        for status in ["applied", "applied", "offer"] {
            send_json(
                app_router(state.clone()),
                "POST",
                "/api/applications",
                Some(&token),
                Some(json!({ "role_id": role, "status": status })),
            )
            .await;
        }

        let (status, counts) = send_json(
            app_router(state),
            "GET",
            "/api/applications/dashboard",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(counts["applied"], 2);
        assert_eq!(counts["offer"], 1);
        assert!(counts.get("saved").is_none());
    }

    #[tokio::test]
    async fn stats_zero_fill_and_group_top_companies() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let acme = seed_role(&state, &token, "Acme", "Backend Engineer").await;
        let globex = seed_role(&state, &token, "Globex", "Data Scientist").await;
        for role in [acme, acme, globex] {
            send_json(
                app_router(state.clone()),
                "POST",
                "/api/applications",
                Some(&token),
                Some(json!({ "role_id": role, "status": "applied", "priority": 3 })),
            )
            .await;
        }

        let (status, stats) = send_json(
            app_router(state),
            "GET",
            "/api/applications/stats",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 3);
        assert_eq!(stats["status_counts"]["applied"], 3);
        assert_eq!(stats["status_counts"]["saved"], 0);
        assert_eq!(stats["recent_activity"]["new_applications"], 3);
        assert_eq!(stats["priority_counts"]["high"], 3);
        assert_eq!(stats["top_companies"][0]["company"], "Acme");
        assert_eq!(stats["top_companies"][0]["count"], 2);
    }

    #[tokio::test]
    async fn stats_are_scoped_to_the_principal() {
        let state = setup_state().await;
        let ada = register_and_login(&state, "ada").await;
        let kay = register_and_login(&state, "kay").await;
        let role = seed_role(&state, &ada, "Acme", "Backend Engineer").await;
        seed_application(&state, &ada, role).await;

        let (status, stats) = send_json(
            app_router(state),
            "GET",
            "/api/applications/stats",
            Some(&kay),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 0);
    }
}
