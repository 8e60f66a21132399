//! Stage endpoints. Stages belong to the user transitively through their
//! parent application, so creation checks the parent and detail routes run
//! the guard over the owner resolved on the fetched row.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use jobtrail_core::ownership::{check, check_entity, Ownership};
use jobtrail_core::types::{Stage, StageKind};
use jobtrail_storage::{NewStage, StageError, StageListQuery, StagePatch, StageRow};

use crate::auth::AuthUser;
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct StageQuery {
    #[serde(default)]
    application: Option<i64>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    application_id: i64,
    kind: StageKind,
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    result: String,
    #[serde(default)]
    notes: String,
}

/// Confirms the parent application exists and belongs to the principal.
/// A foreign parent reads as missing, the same as on detail routes.
async fn check_parent(
    state: &AppState,
    application_id: i64,
    user_id: i64,
) -> Result<(), ProblemResponse> {
    let parent = state
        .storage()
        .applications()
        .fetch(application_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| ProblemResponse::validation("referenced application does not exist"))?;
    if !check_entity(&parent.application, user_id).is_allowed() {
        return Err(ProblemResponse::not_found());
    }
    Ok(())
}

async fn fetch_owned(state: &AppState, id: i64, user_id: i64) -> Result<StageRow, ProblemResponse> {
    let row = state
        .storage()
        .stages()
        .fetch(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    if !check(Ownership::Transitive(row.owner_id), user_id).is_allowed() {
        return Err(ProblemResponse::not_found());
    }
    Ok(row)
}

fn map_stage_error(err: StageError) -> ProblemResponse {
    match err {
        StageError::MissingApplication => {
            ProblemResponse::validation("referenced application does not exist")
        }
        other => internal_error(other),
    }
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<StageQuery>,
) -> Result<Json<Vec<Stage>>, ProblemResponse> {
    let kind = query
        .kind
        .as_deref()
        .map(StageKind::parse)
        .transpose()
        .map_err(|err| ProblemResponse::validation(err.to_string()))?;

    let rows = state
        .storage()
        .stages()
        .list(
            user_id,
            &StageListQuery {
                application: query.application,
                kind,
                result: query.result,
                ordering: query.ordering,
            },
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(|row| row.stage).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<StageRequest>,
) -> Result<(StatusCode, Json<Stage>), ProblemResponse> {
    check_parent(&state, body.application_id, user_id).await?;

    let row = state
        .storage()
        .stages()
        .create(NewStage {
            application_id: body.application_id,
            kind: body.kind,
            scheduled_at: body.scheduled_at,
            result: &body.result,
            notes: &body.notes,
            created_at: state.now(),
        })
        .await
        .map_err(map_stage_error)?;
    Ok((StatusCode::CREATED, Json(row.stage)))
}

/// Unresolved stages scheduled inside the next seven days, soonest first.
pub async fn upcoming(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Stage>>, ProblemResponse> {
    let rows = state
        .storage()
        .stages()
        .list_upcoming(user_id, state.now())
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(|row| row.stage).collect()))
}

pub async fn detail(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Stage>, ProblemResponse> {
    let row = fetch_owned(&state, id, user_id).await?;
    Ok(Json(row.stage))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<StageRequest>,
) -> Result<Json<Stage>, ProblemResponse> {
    let existing = fetch_owned(&state, id, user_id).await?;
    // Stages never move between applications.
    if body.application_id != existing.stage.application_id {
        return Err(ProblemResponse::validation(
            "a stage cannot change its application",
        ));
    }

    let row = state
        .storage()
        .stages()
        .update(
            id,
            StagePatch {
                kind: body.kind,
                scheduled_at: body.scheduled_at,
                result: &body.result,
                notes: &body.notes,
            },
        )
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(row.stage))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    fetch_owned(&state, id, user_id).await?;

    state
        .storage()
        .stages()
        .delete(id)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}
