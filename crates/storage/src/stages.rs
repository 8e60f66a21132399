use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use jobtrail_core::stats::UPCOMING_WINDOW_DAYS;
use jobtrail_core::types::{Stage, StageKind};

use crate::{sqlite_error_code, to_rfc3339, SQLITE_CONSTRAINT_FOREIGNKEY};

/// Repository for interview stages, owned transitively through applications.
#[derive(Clone)]
pub struct StageRepository {
    pool: SqlitePool,
}

/// Data required to create a stage.
pub struct NewStage<'a> {
    pub application_id: i64,
    pub kind: StageKind,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub result: &'a str,
    pub notes: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Replacement payload for an existing stage.
pub struct StagePatch<'a> {
    pub kind: StageKind,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub result: &'a str,
    pub notes: &'a str,
}

/// Filters for owner-scoped stage listings.
#[derive(Debug, Default, Clone)]
pub struct StageListQuery {
    pub application: Option<i64>,
    pub kind: Option<StageKind>,
    pub result: Option<String>,
    /// `created_at` or `scheduled_at`, `-` prefixed for descending.
    pub ordering: Option<String>,
}

/// Stage joined with the owner resolved through the parent application.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRow {
    pub stage: Stage,
    /// The one-hop owner, used by the ownership guard.
    pub owner_id: i64,
}

#[derive(sqlx::FromRow)]
struct RawStageRow {
    id: i64,
    application_id: i64,
    kind: String,
    scheduled_at: Option<DateTime<Utc>>,
    result: String,
    notes: String,
    created_at: DateTime<Utc>,
    owner_id: i64,
}

impl RawStageRow {
    fn into_domain(self) -> StageRow {
        let kind = StageKind::parse(&self.kind).unwrap_or(StageKind::Other);
        StageRow {
            stage: Stage {
                id: self.id,
                application_id: self.application_id,
                kind,
                scheduled_at: self.scheduled_at,
                result: self.result,
                notes: self.notes,
                created_at: self.created_at,
            },
            owner_id: self.owner_id,
        }
    }
}

const STAGE_SELECT: &str = "SELECT s.id, s.application_id, s.kind, s.scheduled_at, s.result, \
     s.notes, s.created_at, a.user_id AS owner_id \
     FROM stages AS s JOIN applications AS a ON a.id = s.application_id";

impl StageRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, stage: NewStage<'_>) -> Result<StageRow, StageError> {
        let inserted: (i64,) = sqlx::query_as(
            "INSERT INTO stages (application_id, kind, scheduled_at, result, notes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(stage.application_id)
        .bind(stage.kind.as_str())
        .bind(stage.scheduled_at.map(to_rfc3339))
        .bind(stage.result)
        .bind(stage.notes)
        .bind(to_rfc3339(stage.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if sqlite_error_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
                StageError::MissingApplication
            } else {
                StageError::Database(err)
            }
        })?;

        self.fetch(inserted.0).await?.ok_or(StageError::Vanished)
    }

    pub async fn list(
        &self,
        user_id: i64,
        query: &StageListQuery,
    ) -> Result<Vec<StageRow>, StageError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("{STAGE_SELECT} WHERE a.user_id = "));
        builder.push_bind(user_id);

        if let Some(application) = query.application {
            builder.push(" AND s.application_id = ");
            builder.push_bind(application);
        }
        if let Some(kind) = query.kind {
            builder.push(" AND s.kind = ");
            builder.push_bind(kind.as_str());
        }
        if let Some(ref result) = query.result {
            builder.push(" AND s.result = ");
            builder.push_bind(result.clone());
        }

        let order = match query.ordering.as_deref() {
            Some("-created_at") => "s.created_at DESC",
            Some("scheduled_at") => "s.scheduled_at ASC",
            Some("-scheduled_at") => "s.scheduled_at DESC",
            _ => "s.created_at ASC",
        };
        builder.push(format!(" ORDER BY {order}, s.id ASC"));

        let rows = builder
            .build_query_as::<RawStageRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(RawStageRow::into_domain).collect())
    }

    /// Stages scheduled inside `[now, now + 7 days]` with no concluded result,
    /// ordered by schedule time.
    pub async fn list_upcoming(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<StageRow>, StageError> {
        let window_end = now + Duration::days(UPCOMING_WINDOW_DAYS);
        let rows = sqlx::query_as::<_, RawStageRow>(&format!(
            "{STAGE_SELECT} \
             WHERE a.user_id = ? \
               AND s.scheduled_at >= ? \
               AND s.scheduled_at <= ? \
               AND s.result IN ('', 'pending') \
             ORDER BY s.scheduled_at ASC"
        ))
        .bind(user_id)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(window_end))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RawStageRow::into_domain).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<StageRow>, StageError> {
        let row = sqlx::query_as::<_, RawStageRow>(&format!("{STAGE_SELECT} WHERE s.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(RawStageRow::into_domain))
    }

    pub async fn update(&self, id: i64, patch: StagePatch<'_>) -> Result<Option<StageRow>, StageError> {
        let result = sqlx::query(
            "UPDATE stages SET kind = ?, scheduled_at = ?, result = ?, notes = ? WHERE id = ?",
        )
        .bind(patch.kind.as_str())
        .bind(patch.scheduled_at.map(to_rfc3339))
        .bind(patch.result)
        .bind(patch.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, StageError> {
        let result = sqlx::query("DELETE FROM stages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Errors that can occur while managing stages.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("referenced application does not exist")]
    MissingApplication,
    #[error("stage disappeared between insert and fetch")]
    Vanished,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
