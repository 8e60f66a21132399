use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use jobtrail_core::stats::ApplicationFacts;
use jobtrail_core::types::{Application, ApplicationStatus};

use crate::{sqlite_error_code, to_rfc3339, SQLITE_CONSTRAINT_FOREIGNKEY};

/// Repository for a user's applications.
#[derive(Clone)]
pub struct ApplicationRepository {
    pool: SqlitePool,
}

/// Data required to create an application.
pub struct NewApplication<'a> {
    pub user_id: i64,
    pub role_id: i64,
    pub status: ApplicationStatus,
    pub source: &'a str,
    pub applied_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub priority: i64,
    pub notes: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Replacement payload for an existing application. The owner is immutable.
pub struct ApplicationPatch<'a> {
    pub role_id: i64,
    pub status: ApplicationStatus,
    pub source: &'a str,
    pub applied_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub priority: i64,
    pub notes: &'a str,
    pub updated_at: DateTime<Utc>,
}

/// Filters for owner-scoped application listings.
#[derive(Debug, Default, Clone)]
pub struct ApplicationListQuery {
    /// Membership filter; empty means all statuses.
    pub statuses: Vec<ApplicationStatus>,
    pub priority: Option<i64>,
    /// Substring match over role title, company name and source.
    pub search: Option<String>,
    /// One of `created_at`, `updated_at`, `applied_at`, `priority`,
    /// `-` prefixed for descending.
    pub ordering: Option<String>,
}

/// Application joined with its role and company for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRow {
    pub application: Application,
    pub role_title: String,
    pub company_name: String,
}

#[derive(sqlx::FromRow)]
struct RawApplicationRow {
    id: i64,
    user_id: i64,
    role_id: i64,
    status: String,
    source: String,
    applied_at: Option<DateTime<Utc>>,
    deadline_at: Option<DateTime<Utc>>,
    priority: i64,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    role_title: String,
    company_name: String,
}

impl RawApplicationRow {
    fn into_domain(self) -> ApplicationRow {
        let status =
            ApplicationStatus::parse(&self.status).unwrap_or(ApplicationStatus::Saved);
        ApplicationRow {
            application: Application {
                id: self.id,
                user_id: self.user_id,
                role_id: self.role_id,
                status,
                source: self.source,
                applied_at: self.applied_at,
                deadline_at: self.deadline_at,
                priority: self.priority,
                notes: self.notes,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            role_title: self.role_title,
            company_name: self.company_name,
        }
    }
}

const APPLICATION_SELECT: &str = "SELECT a.id, a.user_id, a.role_id, a.status, a.source, \
     a.applied_at, a.deadline_at, a.priority, a.notes, a.created_at, a.updated_at, \
     r.title AS role_title, c.name AS company_name \
     FROM applications AS a \
     JOIN roles AS r ON r.id = a.role_id \
     JOIN companies AS c ON c.id = r.company_id";

fn push_status_filter(builder: &mut QueryBuilder<'_, Sqlite>, statuses: &[ApplicationStatus]) {
    if statuses.is_empty() {
        return;
    }
    builder.push(" AND a.status IN (");
    let mut separated = builder.separated(", ");
    for status in statuses {
        separated.push_bind(status.as_str());
    }
    builder.push(")");
}

impl ApplicationRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        application: NewApplication<'_>,
    ) -> Result<ApplicationRow, ApplicationError> {
        let created_at = to_rfc3339(application.created_at);
        let inserted: (i64,) = sqlx::query_as(
            "INSERT INTO applications \
             (user_id, role_id, status, source, applied_at, deadline_at, priority, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(application.user_id)
        .bind(application.role_id)
        .bind(application.status.as_str())
        .bind(application.source)
        .bind(application.applied_at.map(to_rfc3339))
        .bind(application.deadline_at.map(to_rfc3339))
        .bind(application.priority)
        .bind(application.notes)
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_fk_error)?;

        self.fetch(inserted.0)
            .await?
            .ok_or(ApplicationError::Vanished)
    }

    /// Lists the principal's applications with the provided filters.
    pub async fn list(
        &self,
        user_id: i64,
        query: &ApplicationListQuery,
    ) -> Result<Vec<ApplicationRow>, ApplicationError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("{APPLICATION_SELECT} WHERE a.user_id = "));
        builder.push_bind(user_id);

        push_status_filter(&mut builder, &query.statuses);

        if let Some(priority) = query.priority {
            builder.push(" AND a.priority = ");
            builder.push_bind(priority);
        }
        if let Some(ref search) = query.search {
            let pattern = format!("%{search}%");
            builder.push(" AND (r.title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR c.name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR a.source LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        let order = match query.ordering.as_deref() {
            Some("created_at") => "a.created_at ASC",
            Some("-created_at") => "a.created_at DESC",
            Some("updated_at") => "a.updated_at ASC",
            Some("applied_at") => "a.applied_at ASC",
            Some("-applied_at") => "a.applied_at DESC",
            Some("priority") => "a.priority ASC",
            Some("-priority") => "a.priority DESC",
            // Most recently touched first by default.
            _ => "a.updated_at DESC",
        };
        builder.push(format!(" ORDER BY {order}, a.id DESC"));

        let rows = builder
            .build_query_as::<RawApplicationRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(RawApplicationRow::into_domain)
            .collect())
    }

    /// Loads the aggregation facts for the principal's scope.
    pub async fn list_facts(
        &self,
        user_id: i64,
        statuses: &[ApplicationStatus],
    ) -> Result<Vec<ApplicationFacts>, ApplicationError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT a.status, a.priority, a.created_at, a.applied_at, c.name AS company_name \
             FROM applications AS a \
             JOIN roles AS r ON r.id = a.role_id \
             JOIN companies AS c ON c.id = r.company_id \
             WHERE a.user_id = ",
        );
        builder.push_bind(user_id);
        push_status_filter(&mut builder, statuses);
        builder.push(" ORDER BY a.id ASC");

        #[derive(sqlx::FromRow)]
        struct FactsRow {
            status: String,
            priority: i64,
            created_at: DateTime<Utc>,
            applied_at: Option<DateTime<Utc>>,
            company_name: String,
        }

        let rows = builder
            .build_query_as::<FactsRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ApplicationFacts {
                status: ApplicationStatus::parse(&row.status)
                    .unwrap_or(ApplicationStatus::Saved),
                priority: row.priority,
                created_at: row.created_at,
                applied_at: row.applied_at,
                company: row.company_name,
            })
            .collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<ApplicationRow>, ApplicationError> {
        let row =
            sqlx::query_as::<_, RawApplicationRow>(&format!("{APPLICATION_SELECT} WHERE a.id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(RawApplicationRow::into_domain))
    }

    pub async fn update(
        &self,
        id: i64,
        patch: ApplicationPatch<'_>,
    ) -> Result<Option<ApplicationRow>, ApplicationError> {
        let result = sqlx::query(
            "UPDATE applications SET role_id = ?, status = ?, source = ?, applied_at = ?, \
             deadline_at = ?, priority = ?, notes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(patch.role_id)
        .bind(patch.status.as_str())
        .bind(patch.source)
        .bind(patch.applied_at.map(to_rfc3339))
        .bind(patch.deadline_at.map(to_rfc3339))
        .bind(patch.priority)
        .bind(patch.notes)
        .bind(to_rfc3339(patch.updated_at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_fk_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, ApplicationError> {
        let result = sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_fk_error(err: sqlx::Error) -> ApplicationError {
    if sqlite_error_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
        ApplicationError::MissingParent
    } else {
        ApplicationError::Database(err)
    }
}

/// Errors that can occur while managing applications.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("referenced user or role does not exist")]
    MissingParent,
    #[error("application disappeared between insert and fetch")]
    Vanished,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
