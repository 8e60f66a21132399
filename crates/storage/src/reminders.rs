use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use jobtrail_core::stats::UPCOMING_WINDOW_DAYS;
use jobtrail_core::types::Reminder;

use crate::{sqlite_error_code, to_rfc3339, SQLITE_CONSTRAINT_FOREIGNKEY};

/// Repository for user reminders.
#[derive(Clone)]
pub struct ReminderRepository {
    pool: SqlitePool,
}

/// Data required to create a reminder.
pub struct NewReminder<'a> {
    pub user_id: i64,
    pub application_id: Option<i64>,
    pub due_at: DateTime<Utc>,
    pub message: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Replacement payload for an existing reminder. The owner is immutable.
pub struct ReminderPatch<'a> {
    pub application_id: Option<i64>,
    pub due_at: DateTime<Utc>,
    pub message: &'a str,
    pub done: bool,
}

/// Filters for owner-scoped reminder listings.
#[derive(Debug, Default, Clone)]
pub struct ReminderListQuery {
    pub done: Option<bool>,
    pub application: Option<i64>,
    /// `due_at` or `created_at`, `-` prefixed for descending.
    pub ordering: Option<String>,
}

/// A due reminder joined with the owner's contact address for dispatch.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueReminder {
    pub id: i64,
    pub user_id: i64,
    pub due_at: DateTime<Utc>,
    pub message: String,
    pub email: String,
}

#[derive(sqlx::FromRow)]
struct RawReminderRow {
    id: i64,
    user_id: i64,
    application_id: Option<i64>,
    due_at: DateTime<Utc>,
    message: String,
    done: i64,
    created_at: DateTime<Utc>,
}

impl RawReminderRow {
    fn into_domain(self) -> Reminder {
        Reminder {
            id: self.id,
            user_id: self.user_id,
            application_id: self.application_id,
            due_at: self.due_at,
            message: self.message,
            done: self.done != 0,
            created_at: self.created_at,
        }
    }
}

const REMINDER_COLUMNS: &str = "id, user_id, application_id, due_at, message, done, created_at";

impl ReminderRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, reminder: NewReminder<'_>) -> Result<Reminder, ReminderError> {
        let row = sqlx::query_as::<_, RawReminderRow>(&format!(
            "INSERT INTO reminders (user_id, application_id, due_at, message, done, created_at) \
             VALUES (?, ?, ?, ?, 0, ?) \
             RETURNING {REMINDER_COLUMNS}"
        ))
        .bind(reminder.user_id)
        .bind(reminder.application_id)
        .bind(to_rfc3339(reminder.due_at))
        .bind(reminder.message)
        .bind(to_rfc3339(reminder.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(map_fk_error)?;

        Ok(row.into_domain())
    }

    pub async fn list(
        &self,
        user_id: i64,
        query: &ReminderListQuery,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE user_id = "
        ));
        builder.push_bind(user_id);

        if let Some(done) = query.done {
            builder.push(" AND done = ");
            builder.push_bind(if done { 1 } else { 0 });
        }
        if let Some(application) = query.application {
            builder.push(" AND application_id = ");
            builder.push_bind(application);
        }

        let order = match query.ordering.as_deref() {
            Some("-due_at") => "due_at DESC",
            Some("created_at") => "created_at ASC",
            Some("-created_at") => "created_at DESC",
            _ => "due_at ASC",
        };
        builder.push(format!(" ORDER BY {order}, id ASC"));

        let rows = builder
            .build_query_as::<RawReminderRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(RawReminderRow::into_domain).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Reminder>, ReminderError> {
        let row = sqlx::query_as::<_, RawReminderRow>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RawReminderRow::into_domain))
    }

    pub async fn update(
        &self,
        id: i64,
        patch: ReminderPatch<'_>,
    ) -> Result<Option<Reminder>, ReminderError> {
        let row = sqlx::query_as::<_, RawReminderRow>(&format!(
            "UPDATE reminders SET application_id = ?, due_at = ?, message = ?, done = ? \
             WHERE id = ? \
             RETURNING {REMINDER_COLUMNS}"
        ))
        .bind(patch.application_id)
        .bind(to_rfc3339(patch.due_at))
        .bind(patch.message)
        .bind(if patch.done { 1 } else { 0 })
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_fk_error)?;

        Ok(row.map(RawReminderRow::into_domain))
    }

    pub async fn delete(&self, id: i64) -> Result<bool, ReminderError> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Undone reminders already past due, oldest first.
    pub async fn list_overdue(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let rows = sqlx::query_as::<_, RawReminderRow>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE user_id = ? AND done = 0 AND due_at < ? \
             ORDER BY due_at ASC, id ASC"
        ))
        .bind(user_id)
        .bind(to_rfc3339(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RawReminderRow::into_domain).collect())
    }

    /// Undone reminders due inside `[now, now + 7 days]`, soonest first.
    pub async fn list_upcoming(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let window_end = now + Duration::days(UPCOMING_WINDOW_DAYS);
        let rows = sqlx::query_as::<_, RawReminderRow>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE user_id = ? AND done = 0 AND due_at >= ? AND due_at <= ? \
             ORDER BY due_at ASC, id ASC"
        ))
        .bind(user_id)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(window_end))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RawReminderRow::into_domain).collect())
    }

    /// Marks the listed reminders done for the given owner, skipping ones
    /// already done. Returns how many rows changed.
    pub async fn mark_all_done(&self, user_id: i64, ids: &[i64]) -> Result<u64, ReminderError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE reminders SET done = 1 WHERE done = 0 AND user_id = ");
        builder.push_bind(user_id);
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        builder.push(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Due, undone reminders joined with their owner's email, for dispatch.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>, ReminderError> {
        let rows = sqlx::query_as::<_, DueReminder>(
            "SELECT r.id, r.user_id, r.due_at, r.message, u.email \
             FROM reminders AS r JOIN users AS u ON u.id = r.user_id \
             WHERE r.done = 0 AND r.due_at <= ? \
             ORDER BY r.due_at ASC, r.id ASC",
        )
        .bind(to_rfc3339(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Flips a single reminder to done. Safe to retry; returns whether the
    /// row existed.
    pub async fn mark_done(&self, id: i64) -> Result<bool, ReminderError> {
        let result = sqlx::query("UPDATE reminders SET done = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_fk_error(err: sqlx::Error) -> ReminderError {
    if sqlite_error_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
        ReminderError::MissingParent
    } else {
        ReminderError::Database(err)
    }
}

/// Errors that can occur while managing reminders.
#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("referenced user or application does not exist")]
    MissingParent,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
