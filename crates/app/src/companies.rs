//! Company endpoints. Companies are shared reference data: reads are open to
//! any authenticated user and creation deduplicates by case-insensitive name.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use jobtrail_core::types::Company;
use jobtrail_storage::{CompanyListQuery, NewCompany};

use crate::auth::AuthUser;
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CompanyQuery {
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompanyRequest {
    name: String,
    #[serde(default)]
    website: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Query(query): Query<CompanyQuery>,
) -> Result<Json<Vec<Company>>, ProblemResponse> {
    let companies = state
        .storage()
        .companies()
        .list(&CompanyListQuery {
            search: query.search,
            ordering: query.ordering,
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(companies))
}

/// Get-or-create by name: 201 for a fresh row, 200 for the existing one.
pub async fn create(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Json(body): Json<CompanyRequest>,
) -> Result<(StatusCode, Json<Company>), ProblemResponse> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ProblemResponse::validation("company name is required"));
    }

    let (company, created) = state
        .storage()
        .companies()
        .get_or_create(NewCompany {
            name,
            website: &body.website,
            country: &body.country,
            city: &body.city,
        })
        .await
        .map_err(internal_error)?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(company)))
}

pub async fn detail(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Company>, ProblemResponse> {
    let company = state
        .storage()
        .companies()
        .fetch(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(company))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<CompanyRequest>,
) -> Result<Json<Company>, ProblemResponse> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ProblemResponse::validation("company name is required"));
    }

    let company = state
        .storage()
        .companies()
        .update(
            id,
            NewCompany {
                name,
                website: &body.website,
                country: &body.country,
                city: &body.city,
            },
        )
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(company))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .companies()
        .delete(id)
        .await
        .map_err(internal_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
