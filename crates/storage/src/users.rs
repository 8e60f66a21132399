use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{sqlite_error_code, to_rfc3339, SQLITE_CONSTRAINT_UNIQUE};

/// Repository for user accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

/// Persisted user record, including the password hash for verification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Data required to register a new user.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub created_at: DateTime<Utc>,
}

impl UserRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new user, surfacing unique username/email collisions.
    pub async fn create(&self, user: NewUser<'_>) -> Result<UserRecord, UserError> {
        let row = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (username, email, password_hash, created_at) \
             VALUES (?, ?, ?, ?) \
             RETURNING id, username, email, password_hash, created_at",
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(to_rfc3339(user.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if sqlite_error_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) {
                UserError::Duplicate
            } else {
                UserError::Database(err)
            }
        })?;

        Ok(row)
    }

    pub async fn fetch_by_username(&self, username: &str) -> Result<Option<UserRecord>, UserError> {
        let row = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<UserRecord>, UserError> {
        let row = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

/// Errors that can occur while managing users.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("username or email is already registered")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let db = setup_db().await;
        let repo = db.users();
        let created = repo
            .create(NewUser {
                username: "ada",
                email: "ada@example.com",
                password_hash: "hash",
                created_at: Utc::now(),
            })
            .await
            .expect("create user");

        let by_name = repo
            .fetch_by_username("ada")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_name.email, "ada@example.com");

        let missing = repo.fetch_by_username("nobody").await.expect("fetch");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let db = setup_db().await;
        let repo = db.users();
        let user = NewUser {
            username: "ada",
            email: "ada@example.com",
            password_hash: "hash",
            created_at: Utc::now(),
        };
        repo.create(user).await.expect("first insert");

        let err = repo
            .create(NewUser {
                username: "ada",
                email: "other@example.com",
                password_hash: "hash",
                created_at: Utc::now(),
            })
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(err, UserError::Duplicate));
    }
}
