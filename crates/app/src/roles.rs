//! Role endpoints. Roles are shared reference data like companies; each
//! response carries the joined company name for display.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use jobtrail_core::types::Role;
use jobtrail_storage::{NewRole, RoleError, RoleListQuery, RoleRow};

use crate::auth::AuthUser;
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    #[serde(default)]
    company: Option<i64>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    min_salary: Option<i64>,
    #[serde(default)]
    max_salary: Option<i64>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    company_id: i64,
    title: String,
    #[serde(default)]
    level: String,
    #[serde(default)]
    job_url: String,
    #[serde(default)]
    stack_tags: Vec<String>,
    #[serde(default)]
    salary_min: Option<i64>,
    #[serde(default)]
    salary_max: Option<i64>,
    #[serde(default)]
    currency: String,
}

#[derive(Debug, Serialize)]
pub struct RoleBody {
    #[serde(flatten)]
    role: Role,
    company_name: String,
}

impl From<RoleRow> for RoleBody {
    fn from(row: RoleRow) -> Self {
        Self {
            role: row.role,
            company_name: row.company_name,
        }
    }
}

fn map_role_error(err: RoleError) -> ProblemResponse {
    match err {
        RoleError::MissingCompany => {
            ProblemResponse::validation("referenced company does not exist")
        }
        other => internal_error(other),
    }
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Query(query): Query<RoleQuery>,
) -> Result<Json<Vec<RoleBody>>, ProblemResponse> {
    let rows = state
        .storage()
        .roles()
        .list(&RoleListQuery {
            company: query.company,
            level: query.level,
            company_name: query.company_name,
            min_salary: query.min_salary,
            max_salary: query.max_salary,
            search: query.search,
            ordering: query.ordering,
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(RoleBody::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Json(body): Json<RoleRequest>,
) -> Result<(StatusCode, Json<RoleBody>), ProblemResponse> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ProblemResponse::validation("role title is required"));
    }

    let row = state
        .storage()
        .roles()
        .create(NewRole {
            company_id: body.company_id,
            title,
            level: &body.level,
            job_url: &body.job_url,
            stack_tags: &body.stack_tags,
            salary_min: body.salary_min,
            salary_max: body.salary_max,
            currency: &body.currency,
        })
        .await
        .map_err(map_role_error)?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn detail(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<RoleBody>, ProblemResponse> {
    let row = state
        .storage()
        .roles()
        .fetch(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(row.into()))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<RoleRequest>,
) -> Result<Json<RoleBody>, ProblemResponse> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ProblemResponse::validation("role title is required"));
    }

    let row = state
        .storage()
        .roles()
        .update(
            id,
            NewRole {
                company_id: body.company_id,
                title,
                level: &body.level,
                job_url: &body.job_url,
                stack_tags: &body.stack_tags,
                salary_min: body.salary_min,
                salary_max: body.salary_max,
                currency: &body.currency,
            },
        )
        .await
        .map_err(map_role_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(row.into()))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .roles()
        .delete(id)
        .await
        .map_err(internal_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
