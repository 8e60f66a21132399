use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use jobtrail_core::types::Role;

use crate::{sqlite_error_code, SQLITE_CONSTRAINT_FOREIGNKEY};

/// Repository for roles posted by companies.
#[derive(Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
}

/// Data required to create or replace a role.
pub struct NewRole<'a> {
    pub company_id: i64,
    pub title: &'a str,
    pub level: &'a str,
    pub job_url: &'a str,
    pub stack_tags: &'a [String],
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub currency: &'a str,
}

/// Optional filters for role listings.
#[derive(Debug, Default, Clone)]
pub struct RoleListQuery {
    pub company: Option<i64>,
    pub level: Option<String>,
    pub company_name: Option<String>,
    pub min_salary: Option<i64>,
    pub max_salary: Option<i64>,
    /// Substring match over title, company name and stack tags.
    pub search: Option<String>,
    /// One of `title`, `salary_min`, `salary_max`, `-` prefixed for descending.
    pub ordering: Option<String>,
}

/// Role joined with its company name for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRow {
    pub role: Role,
    pub company_name: String,
}

#[derive(sqlx::FromRow)]
struct RawRoleRow {
    id: i64,
    company_id: i64,
    title: String,
    level: String,
    job_url: String,
    stack_tags: String,
    salary_min: Option<i64>,
    salary_max: Option<i64>,
    currency: String,
    company_name: String,
}

impl RawRoleRow {
    fn into_domain(self) -> RoleRow {
        let stack_tags = serde_json::from_str(&self.stack_tags).unwrap_or_default();
        RoleRow {
            role: Role {
                id: self.id,
                company_id: self.company_id,
                title: self.title,
                level: self.level,
                job_url: self.job_url,
                stack_tags,
                salary_min: self.salary_min,
                salary_max: self.salary_max,
                currency: self.currency,
            },
            company_name: self.company_name,
        }
    }
}

const ROLE_SELECT: &str = "SELECT r.id, r.company_id, r.title, r.level, r.job_url, r.stack_tags, \
     r.salary_min, r.salary_max, r.currency, c.name AS company_name \
     FROM roles AS r JOIN companies AS c ON c.id = r.company_id";

impl RoleRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, role: NewRole<'_>) -> Result<RoleRow, RoleError> {
        let tags = serde_json::to_string(role.stack_tags)?;
        let inserted: (i64,) = sqlx::query_as(
            "INSERT INTO roles \
             (company_id, title, level, job_url, stack_tags, salary_min, salary_max, currency) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(role.company_id)
        .bind(role.title)
        .bind(role.level)
        .bind(role.job_url)
        .bind(&tags)
        .bind(role.salary_min)
        .bind(role.salary_max)
        .bind(role.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(map_fk_error)?;

        self.fetch(inserted.0).await?.ok_or(RoleError::Vanished)
    }

    pub async fn list(&self, query: &RoleListQuery) -> Result<Vec<RoleRow>, RoleError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("{ROLE_SELECT} WHERE 1 = 1"));

        if let Some(company) = query.company {
            builder.push(" AND r.company_id = ");
            builder.push_bind(company);
        }
        if let Some(ref level) = query.level {
            builder.push(" AND r.level LIKE ");
            builder.push_bind(format!("%{level}%"));
        }
        if let Some(ref name) = query.company_name {
            builder.push(" AND c.name LIKE ");
            builder.push_bind(format!("%{name}%"));
        }
        if let Some(min_salary) = query.min_salary {
            builder.push(" AND r.salary_min >= ");
            builder.push_bind(min_salary);
        }
        if let Some(max_salary) = query.max_salary {
            builder.push(" AND r.salary_max <= ");
            builder.push_bind(max_salary);
        }
        if let Some(ref search) = query.search {
            let pattern = format!("%{search}%");
            builder.push(" AND (r.title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR c.name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR r.stack_tags LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        let order = match query.ordering.as_deref() {
            Some("title") => "r.title ASC",
            Some("-title") => "r.title DESC",
            Some("salary_min") => "r.salary_min ASC",
            Some("-salary_min") => "r.salary_min DESC",
            Some("salary_max") => "r.salary_max ASC",
            Some("-salary_max") => "r.salary_max DESC",
            // Most recent first by default.
            _ => "r.id DESC",
        };
        builder.push(format!(" ORDER BY {order}"));

        let rows = builder
            .build_query_as::<RawRoleRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(RawRoleRow::into_domain).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<RoleRow>, RoleError> {
        let row = sqlx::query_as::<_, RawRoleRow>(&format!("{ROLE_SELECT} WHERE r.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(RawRoleRow::into_domain))
    }

    pub async fn update(&self, id: i64, role: NewRole<'_>) -> Result<Option<RoleRow>, RoleError> {
        let tags = serde_json::to_string(role.stack_tags)?;
        let result = sqlx::query(
            "UPDATE roles SET company_id = ?, title = ?, level = ?, job_url = ?, \
             stack_tags = ?, salary_min = ?, salary_max = ?, currency = ? WHERE id = ?",
        )
        .bind(role.company_id)
        .bind(role.title)
        .bind(role.level)
        .bind(role.job_url)
        .bind(&tags)
        .bind(role.salary_min)
        .bind(role.salary_max)
        .bind(role.currency)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_fk_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, RoleError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_fk_error(err: sqlx::Error) -> RoleError {
    if sqlite_error_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
        RoleError::MissingCompany
    } else {
        RoleError::Database(err)
    }
}

/// Errors that can occur while managing roles.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("referenced company does not exist")]
    MissingCompany,
    #[error("role disappeared between insert and fetch")]
    Vanished,
    #[error("failed to encode stack tags: {0}")]
    Tags(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;
    use crate::NewCompany;

    async fn seed_company(db: &crate::Database, name: &str) -> i64 {
        let (company, _) = db
            .companies()
            .get_or_create(NewCompany {
                name,
                website: "",
                country: "",
                city: "",
            })
            .await
            .expect("company");
        company.id
    }

    fn backend_role(company_id: i64) -> NewRole<'static> {
        NewRole {
            company_id,
            title: "Backend Engineer",
            level: "Junior",
            job_url: "",
            stack_tags: &[],
            salary_min: Some(400),
            salary_max: Some(700),
            currency: "JPY",
        }
    }

    #[tokio::test]
    async fn create_joins_company_name_and_round_trips_tags() {
        let db = setup_db().await;
        let company_id = seed_company(&db, "Acme").await;
        let tags = vec!["rust".to_string(), "sqlite".to_string()];

        let row = db
            .roles()
            .create(NewRole {
                stack_tags: &tags,
                ..backend_role(company_id)
            })
            .await
            .expect("create role");
        assert_eq!(row.company_name, "Acme");
        assert_eq!(row.role.stack_tags, tags);
    }

    #[tokio::test]
    async fn create_rejects_missing_company() {
        let db = setup_db().await;
        let err = db
            .roles()
            .create(backend_role(999))
            .await
            .expect_err("should fail");
        assert!(matches!(err, RoleError::MissingCompany));
    }

    #[tokio::test]
    async fn list_applies_salary_and_search_filters() {
        let db = setup_db().await;
        let acme = seed_company(&db, "Acme").await;
        let globex = seed_company(&db, "Globex").await;
        db.roles().create(backend_role(acme)).await.expect("role 1");
        db.roles()
            .create(NewRole {
                company_id: globex,
                title: "Data Scientist",
                salary_min: Some(800),
                salary_max: Some(1200),
                ..backend_role(globex)
            })
            .await
            .expect("role 2");

        let filtered = db
            .roles()
            .list(&RoleListQuery {
                min_salary: Some(500),
                ..RoleListQuery::default()
            })
            .await
            .expect("filter");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].role.title, "Data Scientist");

        let searched = db
            .roles()
            .list(&RoleListQuery {
                search: Some("acme".to_string()),
                ..RoleListQuery::default()
            })
            .await
            .expect("search");
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].company_name, "Acme");

        let newest_first = db
            .roles()
            .list(&RoleListQuery::default())
            .await
            .expect("list");
        assert_eq!(newest_first[0].role.title, "Data Scientist");
    }
}
