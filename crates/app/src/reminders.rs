//! Reminder endpoints: owner-scoped CRUD, the overdue/upcoming windows,
//! bulk completion and the reminder stats view.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use jobtrail_core::ownership::check_entity;
use jobtrail_core::stats::{self, ReminderStats};
use jobtrail_core::types::Reminder;
use jobtrail_storage::{NewReminder, ReminderError, ReminderListQuery, ReminderPatch};

use crate::auth::AuthUser;
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct ReminderQuery {
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    application: Option<i64>,
    #[serde(default)]
    ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    #[serde(default)]
    application_id: Option<i64>,
    due_at: DateTime<Utc>,
    message: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarkAllDoneRequest {
    reminder_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct MarkAllDoneBody {
    updated: u64,
}

fn map_reminder_error(err: ReminderError) -> ProblemResponse {
    match err {
        ReminderError::MissingParent => {
            ProblemResponse::validation("referenced application does not exist")
        }
        other => internal_error(other),
    }
}

/// When a reminder points at an application, the application must be the
/// principal's own.
async fn check_parent(
    state: &AppState,
    application_id: Option<i64>,
    user_id: i64,
) -> Result<(), ProblemResponse> {
    let Some(application_id) = application_id else {
        return Ok(());
    };
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
) -> Result<Reminder, ProblemResponse> {
    let reminder = state
        .storage()
        .reminders()
        .fetch(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    if !check_entity(&reminder, user_id).is_allowed() {
        return Err(ProblemResponse::not_found());
    }
    Ok(reminder)
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ReminderQuery>,
) -> Result<Json<Vec<Reminder>>, ProblemResponse> {
    let reminders = state
        .storage()
        .reminders()
        .list(
            user_id,
            &ReminderListQuery {
                done: query.done,
                application: query.application,
                ordering: query.ordering,
            },
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(reminders))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ReminderRequest>,
) -> Result<(StatusCode, Json<Reminder>), ProblemResponse> {
    if body.message.trim().is_empty() {
        return Err(ProblemResponse::validation("reminder message is required"));
    }
    check_parent(&state, body.application_id, user_id).await?;

    let reminder = state
        .storage()
        .reminders()
        .create(NewReminder {
            user_id,
            application_id: body.application_id,
            due_at: body.due_at,
            message: &body.message,
            created_at: state.now(),
        })
        .await
        .map_err(map_reminder_error)?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn detail(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Reminder>, ProblemResponse> {
    let reminder = fetch_owned(&state, id, user_id).await?;
    Ok(Json(reminder))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ReminderRequest>,
) -> Result<Json<Reminder>, ProblemResponse> {
    if body.message.trim().is_empty() {
        return Err(ProblemResponse::validation("reminder message is required"));
    }
    fetch_owned(&state, id, user_id).await?;
    check_parent(&state, body.application_id, user_id).await?;

    let reminder = state
        .storage()
        .reminders()
        .update(
            id,
            ReminderPatch {
                application_id: body.application_id,
                due_at: body.due_at,
                message: &body.message,
                done: body.done,
            },
        )
        .await
        .map_err(map_reminder_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(reminder))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    fetch_owned(&state, id, user_id).await?;

    state
        .storage()
        .reminders()
        .delete(id)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Undone reminders already past due, oldest first.
pub async fn overdue(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Reminder>>, ProblemResponse> {
    let reminders = state
        .storage()
        .reminders()
        .list_overdue(user_id, state.now())
        .await
        .map_err(internal_error)?;
    Ok(Json(reminders))
}

/// Undone reminders due inside the next seven days, soonest first.
pub async fn upcoming(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Reminder>>, ProblemResponse> {
    let reminders = state
        .storage()
        .reminders()
        .list_upcoming(user_id, state.now())
        .await
        .map_err(internal_error)?;
    Ok(Json(reminders))
}

/// Bulk completion over the principal's own reminders. Foreign ids and
/// already-done rows are silently skipped; the response reports how many
/// rows actually changed.
pub async fn mark_all_done(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<MarkAllDoneRequest>,
) -> Result<Json<MarkAllDoneBody>, ProblemResponse> {
    let updated = state
        .storage()
        .reminders()
        .mark_all_done(user_id, &body.reminder_ids)
        .await
        .map_err(internal_error)?;
    Ok(Json(MarkAllDoneBody { updated }))
}

pub async fn stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ReminderStats>, ProblemResponse> {
    let reminders = state
        .storage()
        .reminders()
        .list(user_id, &ReminderListQuery::default())
        .await
        .map_err(internal_error)?;
    counter!("api_stats_requests_total", "endpoint" => "reminders").increment(1);
    Ok(Json(stats::reminder_stats(&reminders, state.now())))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::router::app_router;
    use crate::testutil::{register_and_login, send_json, setup_state};

    async fn create_reminder(
        state: &crate::router::AppState,
        token: &str,
        due_in_hours: i64,
        message: &str,
    ) -> i64 {
        let due = Utc::now() + Duration::hours(due_in_hours);
        let (status, reminder) = send_json(
            app_router(state.clone()),
            "POST",
            "/api/reminders",
            Some(token),
            Some(json!({ "due_at": due.to_rfc3339(), "message": message })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        reminder["id"].as_i64().expect("id")
    }

    #[tokio::test]
    async fn create_rejects_blank_messages() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;

        let (status, problem) = send_json(
            app_router(state),
            "POST",
            "/api/reminders",
            Some(&token),
            Some(json!({ "due_at": Utc::now().to_rfc3339(), "message": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(problem["type"], "validation_failure");
    }

    #[tokio::test]
    async fn overdue_and_upcoming_windows_are_disjoint() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let past = create_reminder(&state, &token, -2, "past").await;
        let soon = create_reminder(&state, &token, 48, "soon").await;
        create_reminder(&state, &token, 24 * 9, "far").await;

        let (status, overdue) = send_json(
            app_router(state.clone()),
            "GET",
            "/api/reminders/overdue",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rows = overdue.as_array().expect("array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"].as_i64(), Some(past));

        let (_, upcoming) = send_json(
            app_router(state),
            "GET",
            "/api/reminders/upcoming",
            Some(&token),
            None,
        )
        .await;
        let rows = upcoming.as_array().expect("array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"].as_i64(), Some(soon));
    }

    #[tokio::test]
    async fn mark_all_done_skips_foreign_ids_and_reports_the_count() {
        let state = setup_state().await;
        let ada = register_and_login(&state, "ada").await;
        let kay = register_and_login(&state, "kay").await;
        let mine = create_reminder(&state, &ada, 1, "mine").await;
        let theirs = create_reminder(&state, &kay, 1, "theirs").await;

        let (status, body) = send_json(
            app_router(state.clone()),
            "POST",
            "/api/reminders/mark_all_done",
            Some(&ada),
            Some(json!({ "reminder_ids": [mine, theirs] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 1);

        let (_, foreign) = send_json(
            app_router(state.clone()),
            "GET",
            &format!("/api/reminders/{theirs}"),
            Some(&kay),
            None,
        )
        .await;
        assert_eq!(foreign["done"], false);

        // A second pass changes nothing.
        let (_, again) = send_json(
            app_router(state),
            "POST",
            "/api/reminders/mark_all_done",
            Some(&ada),
            Some(json!({ "reminder_ids": [mine, theirs] })),
        )
        .await;
        assert_eq!(again["updated"], 0);
    }

    #[tokio::test]
    async fn stats_partition_the_collection() {
        let state = setup_state().await;
        let token = register_and_login(&state, "ada").await;
        let done = create_reminder(&state, &token, -24 * 10, "done").await;
        create_reminder(&state, &token, -1, "overdue").await;
        create_reminder(&state, &token, 72, "upcoming").await;
        create_reminder(&state, &token, 24 * 8, "pending only").await;

        let due = Utc::now() - Duration::days(10);
        send_json(
            app_router(state.clone()),
            "PUT",
            &format!("/api/reminders/{done}"),
            Some(&token),
            Some(json!({
                "due_at": due.to_rfc3339(),
                "message": "done",
                "done": true,
            })),
        )
        .await;

        let (status, stats) = send_json(
            app_router(state),
            "GET",
            "/api/reminders/stats",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 4);
        assert_eq!(stats["completed"], 1);
        assert_eq!(stats["pending"], 3);
        assert_eq!(stats["overdue"], 1);
        assert_eq!(stats["upcoming"], 1);
    }

    #[tokio::test]
    async fn foreign_reminders_read_as_missing() {
        let state = setup_state().await;
        let ada = register_and_login(&state, "ada").await;
        let kay = register_and_login(&state, "kay").await;
        let id = create_reminder(&state, &ada, 1, "mine").await;

        let (status, _) = send_json(
            app_router(state.clone()),
            "GET",
            &format!("/api/reminders/{id}"),
            Some(&kay),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(
            app_router(state),
            "DELETE",
            &format!("/api/reminders/{id}"),
            Some(&kay),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
