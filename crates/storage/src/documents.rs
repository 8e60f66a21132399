use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use jobtrail_core::types::{Document, DocumentKind};

use crate::{sqlite_error_code, to_rfc3339, SQLITE_CONSTRAINT_FOREIGNKEY};

/// Repository for documents, owned transitively through applications.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

/// Data required to register a document.
pub struct NewDocument<'a> {
    pub application_id: i64,
    pub kind: DocumentKind,
    pub storage_key: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Filters for owner-scoped document listings.
#[derive(Debug, Default, Clone)]
pub struct DocumentListQuery {
    pub application: Option<i64>,
    pub kind: Option<DocumentKind>,
}

/// Document joined with the owner resolved through the parent application.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    pub document: Document,
    /// The one-hop owner, used by the ownership guard.
    pub owner_id: i64,
}

#[derive(sqlx::FromRow)]
struct RawDocumentRow {
    id: i64,
    application_id: i64,
    kind: String,
    storage_key: String,
    created_at: DateTime<Utc>,
    owner_id: i64,
}

impl RawDocumentRow {
    fn into_domain(self) -> DocumentRow {
        let kind = DocumentKind::parse(&self.kind).unwrap_or(DocumentKind::Other);
        DocumentRow {
            document: Document {
                id: self.id,
                application_id: self.application_id,
                kind,
                storage_key: self.storage_key,
                created_at: self.created_at,
            },
            owner_id: self.owner_id,
        }
    }
}

const DOCUMENT_SELECT: &str = "SELECT d.id, d.application_id, d.kind, d.storage_key, \
     d.created_at, a.user_id AS owner_id \
     FROM documents AS d JOIN applications AS a ON a.id = d.application_id";

impl DocumentRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, document: NewDocument<'_>) -> Result<DocumentRow, DocumentError> {
        let inserted: (i64,) = sqlx::query_as(
            "INSERT INTO documents (application_id, kind, storage_key, created_at) \
             VALUES (?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(document.application_id)
        .bind(document.kind.as_str())
        .bind(document.storage_key)
        .bind(to_rfc3339(document.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if sqlite_error_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
                DocumentError::MissingApplication
            } else {
                DocumentError::Database(err)
            }
        })?;

        self.fetch(inserted.0).await?.ok_or(DocumentError::Vanished)
    }

    pub async fn list(
        &self,
        user_id: i64,
        query: &DocumentListQuery,
    ) -> Result<Vec<DocumentRow>, DocumentError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("{DOCUMENT_SELECT} WHERE a.user_id = "));
        builder.push_bind(user_id);

        if let Some(application) = query.application {
            builder.push(" AND d.application_id = ");
            builder.push_bind(application);
        }
        if let Some(kind) = query.kind {
            builder.push(" AND d.kind = ");
            builder.push_bind(kind.as_str());
        }

        builder.push(" ORDER BY d.created_at DESC, d.id DESC");

        let rows = builder
            .build_query_as::<RawDocumentRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(RawDocumentRow::into_domain).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<DocumentRow>, DocumentError> {
        let row = sqlx::query_as::<_, RawDocumentRow>(&format!("{DOCUMENT_SELECT} WHERE d.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(RawDocumentRow::into_domain))
    }

    pub async fn update(
        &self,
        id: i64,
        kind: DocumentKind,
        storage_key: &str,
    ) -> Result<Option<DocumentRow>, DocumentError> {
        let result = sqlx::query("UPDATE documents SET kind = ?, storage_key = ? WHERE id = ?")
            .bind(kind.as_str())
            .bind(storage_key)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, DocumentError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Errors that can occur while managing documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("referenced application does not exist")]
    MissingApplication,
    #[error("document disappeared between insert and fetch")]
    Vanished,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
