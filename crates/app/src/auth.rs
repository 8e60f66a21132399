//! Registration, password verification and the bearer-token lifecycle.
//!
//! Passwords are stored as argon2id hashes. Access and refresh tokens are
//! HS256 JWTs carrying the user id, the token kind and an expiry checked
//! against the request clock rather than the library default, so token
//! lifetimes stay deterministic under test.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use jobtrail_storage::{NewUser, UserError, UserRecord};

use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

const ACCESS_TTL_SECS: i64 = 60 * 60;
const REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn ttl(self) -> Duration {
        match self {
            Self::Access => Duration::seconds(ACCESS_TTL_SECS),
            Self::Refresh => Duration::seconds(REFRESH_TTL_SECS),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: i64,
    kind: String,
    iat: i64,
    exp: i64,
}

/// Both halves of an issued token pair.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies the HS256 token pair.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        // Expiry is checked manually against the injected clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue_pair(&self, user_id: i64, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue(user_id, TokenKind::Access, now)?,
            refresh: self.issue(user_id, TokenKind::Refresh, now)?,
        })
    }

    fn issue(
        &self,
        user_id: i64,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = TokenClaims {
            sub: user_id,
            kind: kind.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + kind.ttl()).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(TokenError::Issue)
    }

    /// Verifies signature, kind and expiry; returns the subject user id.
    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<i64, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(err.to_string()))?;
        let claims = data.claims;
        if claims.kind != expected.as_str() {
            return Err(TokenError::Invalid("kind_mismatch".to_string()));
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Invalid("token_expired".to_string()));
        }
        Ok(claims.sub)
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Issue(jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// The authenticated principal, extracted from the `Authorization` header.
pub struct AuthUser(pub i64);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ProblemResponse::unauthorized("missing bearer token"))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ProblemResponse::unauthorized("missing bearer token"))?;
        let user_id = state
            .tokens()
            .verify(token, TokenKind::Access, state.now())
            .map_err(|_| ProblemResponse::unauthorized("invalid or expired token"))?;
        Ok(AuthUser(user_id))
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct UserBody {
    id: i64,
    username: String,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserBody {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            email: record.email,
            created_at: record.created_at,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserBody>), ProblemResponse> {
    let username = body.username.trim();
    let email = body.email.trim();
    if username.is_empty() || email.is_empty() {
        return Err(ProblemResponse::validation("username and email are required"));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ProblemResponse::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hash = hash_password(&body.password)?;
    let user = state
        .storage()
        .users()
        .create(NewUser {
            username,
            email,
            password_hash: &hash,
            created_at: state.now(),
        })
        .await
        .map_err(|err| match err {
            UserError::Duplicate => {
                ProblemResponse::conflict("username or email is already registered")
            }
            other => internal_error(other),
        })?;

    counter!("auth_requests_total", "op" => "register", "result" => "ok").increment(1);
    info!(stage = "auth", user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    username: String,
    password: String,
}

pub async fn token(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<TokenPair>, ProblemResponse> {
    let user = state
        .storage()
        .users()
        .fetch_by_username(&body.username)
        .await
        .map_err(internal_error)?;

    let Some(user) = user.filter(|user| verify_password(&body.password, &user.password_hash))
    else {
        counter!("auth_requests_total", "op" => "token", "result" => "denied").increment(1);
        return Err(ProblemResponse::unauthorized("invalid username or password"));
    };

    let pair = state
        .tokens()
        .issue_pair(user.id, state.now())
        .map_err(internal_error)?;
    counter!("auth_requests_total", "op" => "token", "result" => "ok").increment(1);
    Ok(Json(pair))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    refresh: String,
}

/// Exchanges a refresh token for a fresh pair. Rotation is unconditional so
/// long-lived sessions keep moving their expiry forward.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ProblemResponse> {
    let user_id = state
        .tokens()
        .verify(&body.refresh, TokenKind::Refresh, state.now())
        .map_err(|_| ProblemResponse::unauthorized("invalid or expired refresh token"))?;

    let pair = state
        .tokens()
        .issue_pair(user_id, state.now())
        .map_err(internal_error)?;
    Ok(Json(pair))
}

pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserBody>, ProblemResponse> {
    let record = state
        .storage()
        .users()
        .fetch(user_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(ProblemResponse::not_found)?;
    Ok(Json(record.into()))
}

fn hash_password(password: &str) -> Result<String, ProblemResponse> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(internal_error)
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
