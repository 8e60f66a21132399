use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// An RFC 9457 problem+json error response.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    /// Malformed or semantically invalid input, rejected before any work.
    pub fn validation<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failure", detail)
    }

    /// Missing entity, and also the surface for an ownership Deny: a caller
    /// must not learn whether another user's entity exists.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "resource not found")
    }

    pub fn unauthorized<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", detail)
    }

    pub fn conflict<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", detail)
    }

    /// A failing external capability, reported for the single affected operation.
    pub fn external_failure<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "external_capability_failure", detail)
    }

    pub fn internal<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
    }
}

/// Logs the underlying failure and returns an opaque 500.
pub(crate) fn internal_error(err: impl std::fmt::Display) -> ProblemResponse {
    tracing::error!(stage = "api", error = %err, "request failed");
    ProblemResponse::internal("internal error")
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ProblemResponse must stay usable as the error side of a Result in
    // tests that call expect(), which needs the Debug impl.
    #[test]
    fn problems_format_for_debugging() {
        let result: Result<String, ProblemResponse> =
            Err(ProblemResponse::validation("name is required"));
        let rendered = format!("{result:?}");
        assert!(rendered.contains("validation_failure"));
        assert!(rendered.contains("name is required"));
    }

    #[test]
    fn responses_carry_the_problem_content_type() {
        let response = ProblemResponse::not_found().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("application/problem+json")
        );
    }
}
