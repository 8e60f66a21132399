use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use jobtrail_core::types::Company;

/// Repository for shared company records.
#[derive(Clone)]
pub struct CompanyRepository {
    pool: SqlitePool,
}

/// Data required to create a company.
pub struct NewCompany<'a> {
    pub name: &'a str,
    pub website: &'a str,
    pub country: &'a str,
    pub city: &'a str,
}

/// Optional filters for company listings.
#[derive(Debug, Default, Clone)]
pub struct CompanyListQuery {
    /// Substring match over name, country and city.
    pub search: Option<String>,
    /// One of `name`, `country`, optionally prefixed with `-` for descending.
    pub ordering: Option<String>,
}

#[derive(sqlx::FromRow)]
struct CompanyRow {
    id: i64,
    name: String,
    website: String,
    country: String,
    city: String,
}

impl From<CompanyRow> for Company {
    fn from(row: CompanyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            website: row.website,
            country: row.country,
            city: row.city,
        }
    }
}

const COMPANY_COLUMNS: &str = "id, name, website, country, city";

impl CompanyRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the existing company with the same case-insensitive name, or
    /// inserts a new one. The boolean reports whether an insert happened.
    pub async fn get_or_create(
        &self,
        company: NewCompany<'_>,
    ) -> Result<(Company, bool), CompanyError> {
        let existing = sqlx::query_as::<_, CompanyRow>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE name = ? COLLATE NOCASE LIMIT 1"
        ))
        .bind(company.name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok((row.into(), false));
        }

        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "INSERT INTO companies (name, website, country, city) VALUES (?, ?, ?, ?) \
             RETURNING {COMPANY_COLUMNS}"
        ))
        .bind(company.name)
        .bind(company.website)
        .bind(company.country)
        .bind(company.city)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.into(), true))
    }

    pub async fn list(&self, query: &CompanyListQuery) -> Result<Vec<Company>, CompanyError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE 1 = 1"));

        if let Some(ref search) = query.search {
            let pattern = format!("%{search}%");
            builder.push(" AND (name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR country LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR city LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        let order = match query.ordering.as_deref() {
            Some("country") => "country ASC, name ASC",
            Some("-country") => "country DESC, name ASC",
            Some("-name") => "name DESC",
            _ => "name ASC",
        };
        builder.push(format!(" ORDER BY {order}"));

        let rows = builder
            .build_query_as::<CompanyRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Company::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Company>, CompanyError> {
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Company::from))
    }

    pub async fn update(
        &self,
        id: i64,
        company: NewCompany<'_>,
    ) -> Result<Option<Company>, CompanyError> {
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "UPDATE companies SET name = ?, website = ?, country = ?, city = ? WHERE id = ? \
             RETURNING {COMPANY_COLUMNS}"
        ))
        .bind(company.name)
        .bind(company.website)
        .bind(company.country)
        .bind(company.city)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Company::from))
    }

    pub async fn delete(&self, id: i64) -> Result<bool, CompanyError> {
        let result = sqlx::query("DELETE FROM companies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Errors that can occur while managing companies.
#[derive(Debug, Error)]
pub enum CompanyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;

    fn acme() -> NewCompany<'static> {
        NewCompany {
            name: "Acme",
            website: "https://acme.test",
            country: "JP",
            city: "Tokyo",
        }
    }

    #[tokio::test]
    async fn get_or_create_deduplicates_case_insensitively() {
        let db = setup_db().await;
        let repo = db.companies();

        let (first, created) = repo.get_or_create(acme()).await.expect("create");
        assert!(created);

        let (second, created) = repo
            .get_or_create(NewCompany {
                name: "ACME",
                website: "",
                country: "",
                city: "",
            })
            .await
            .expect("dedupe");
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "Acme");
    }

    #[tokio::test]
    async fn list_supports_search_and_ordering() {
        let db = setup_db().await;
        let repo = db.companies();
        repo.get_or_create(acme()).await.expect("acme");
        repo.get_or_create(NewCompany {
            name: "Globex",
            website: "",
            country: "US",
            city: "Springfield",
        })
        .await
        .expect("globex");

        let all = repo
            .list(&CompanyListQuery::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Acme");

        let descending = repo
            .list(&CompanyListQuery {
                search: None,
                ordering: Some("-name".to_string()),
            })
            .await
            .expect("list desc");
        assert_eq!(descending[0].name, "Globex");

        let searched = repo
            .list(&CompanyListQuery {
                search: Some("spring".to_string()),
                ordering: None,
            })
            .await
            .expect("search");
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].name, "Globex");
    }

    #[tokio::test]
    async fn update_and_delete_report_presence() {
        let db = setup_db().await;
        let repo = db.companies();
        let (company, _) = repo.get_or_create(acme()).await.expect("create");

        let updated = repo
            .update(
                company.id,
                NewCompany {
                    name: "Acme Corp",
                    website: "https://acme.test",
                    country: "JP",
                    city: "Osaka",
                },
            )
            .await
            .expect("update")
            .expect("present");
        assert_eq!(updated.city, "Osaka");

        assert!(repo.delete(company.id).await.expect("delete"));
        assert!(!repo.delete(company.id).await.expect("second delete"));
    }
}
