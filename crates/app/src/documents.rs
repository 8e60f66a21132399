//! Document endpoints: registration of uploaded objects plus the presign
//! surface for direct-to-bucket transfer.
//!
//! The bucket never sees request bodies through this service. Clients ask
//! for a presigned PUT, upload directly, then register the key here; reads
//! go through a presigned GET minted per download request.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use jobtrail_blobstore::{PresignError, PresignedUpload};
use jobtrail_core::ownership::{check, check_entity, Ownership};
use jobtrail_core::types::{Document, DocumentKind};
use jobtrail_storage::{DocumentError, DocumentListQuery, DocumentRow, NewDocument};

use crate::auth::AuthUser;
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    #[serde(default)]
    application: Option<i64>,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    application_id: i64,
    kind: DocumentKind,
    storage_key: String,
}

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    key: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadBody {
    download_url: String,
}

fn require_blob(state: &AppState) -> Result<&jobtrail_blobstore::BlobStore, ProblemResponse> {
    state
        .blob()
        .map(|blob| blob.as_ref())
        .ok_or_else(|| ProblemResponse::external_failure("object storage is not configured"))
}

fn map_presign_error(err: PresignError) -> ProblemResponse {
    match err {
        PresignError::InvalidKey(detail) => ProblemResponse::validation(detail),
        other => internal_error(other),
    }
}

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

async fn fetch_owned(
    state: &AppState,
    id: i64,
    user_id: i64,
) -> Result<DocumentRow, ProblemResponse> {
    let row = state
        .storage()
        .documents()
        .fetch(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    if !check(Ownership::Transitive(row.owner_id), user_id).is_allowed() {
        return Err(ProblemResponse::not_found());
    }
    Ok(row)
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<Vec<Document>>, ProblemResponse> {
    let kind = query
        .kind
        .as_deref()
        .map(DocumentKind::parse)
        .transpose()
        .map_err(|err| ProblemResponse::validation(err.to_string()))?;

    let rows = state
        .storage()
        .documents()
        .list(
            user_id,
            &DocumentListQuery {
                application: query.application,
                kind,
            },
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(|row| row.document).collect()))
}

/// Registers an already-uploaded object under an owned application.
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<DocumentRequest>,
) -> Result<(StatusCode, Json<Document>), ProblemResponse> {
    jobtrail_blobstore::validate_key(&body.storage_key).map_err(map_presign_error)?;
    check_parent(&state, body.application_id, user_id).await?;

    let row = state
        .storage()
        .documents()
        .create(NewDocument {
            application_id: body.application_id,
            kind: body.kind,
            storage_key: &body.storage_key,
            created_at: state.now(),
        })
        .await
        .map_err(|err| match err {
            DocumentError::MissingApplication => {
                ProblemResponse::validation("referenced application does not exist")
            }
            other => internal_error(other),
        })?;
    Ok((StatusCode::CREATED, Json(row.document)))
}

/// Mints a presigned PUT descriptor. The key is validated before any
/// signing happens; no database row is touched.
pub async fn presign(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Json(body): Json<PresignRequest>,
) -> Result<Json<PresignedUpload>, ProblemResponse> {
    let blob = require_blob(&state)?;
    let upload = blob
        .presign_upload(&body.key, body.content_type.as_deref(), state.now())
        .map_err(map_presign_error)?;
    Ok(Json(upload))
}

pub async fn detail(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Document>, ProblemResponse> {
    let row = fetch_owned(&state, id, user_id).await?;
    Ok(Json(row.document))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<DocumentRequest>,
) -> Result<Json<Document>, ProblemResponse> {
    jobtrail_blobstore::validate_key(&body.storage_key).map_err(map_presign_error)?;
    let existing = fetch_owned(&state, id, user_id).await?;
    // Documents never move between applications.
    if body.application_id != existing.document.application_id {
        return Err(ProblemResponse::validation(
            "a document cannot change its application",
        ));
    }

    let row = state
        .storage()
        .documents()
        .update(id, body.kind, &body.storage_key)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(row.document))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    fetch_owned(&state, id, user_id).await?;

    state
        .storage()
        .documents()
        .delete(id)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Presigned GET for an owned document's object.
pub async fn download(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<DownloadBody>, ProblemResponse> {
    let row = fetch_owned(&state, id, user_id).await?;
    let blob = require_blob(&state)?;
    let url = blob
        .presign_download(&row.document.storage_key, state.now())
        .map_err(map_presign_error)?;
    Ok(Json(DownloadBody {
        download_url: url.to_string(),
    }))
}
