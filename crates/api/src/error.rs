use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kingz_cloud::storage::StorageError;
use kingz_core::error::CoreError;
use kingz_core::match_lifecycle::MatchRuleViolation;
use kingz_core::presence::CheckInRejection;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses of
/// the form `{ "success": false, "error": <message>, "code": <CODE> }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `kingz_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A check-in refused before touching storage.
    #[error(transparent)]
    CheckIn(#[from] CheckInRejection),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The blob store failed while persisting or reading an object.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<MatchRuleViolation> for AppError {
    fn from(violation: MatchRuleViolation) -> Self {
        AppError::Core(violation.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Check-in rejections ---
            AppError::CheckIn(rejection) => match rejection {
                CheckInRejection::TooFar { .. } => {
                    (StatusCode::BAD_REQUEST, "TOO_FAR", rejection.to_string())
                }
                CheckInRejection::InvalidCoordinates(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
            },

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- Collaborator errors ---
            AppError::Storage(err) => match err {
                StorageError::NotFound(_) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "Stored object not found".to_string(),
                ),
                StorageError::InvalidKey(_) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", err.to_string())
                }
                StorageError::InvalidLink(_) => (
                    StatusCode::FORBIDDEN,
                    "FORBIDDEN",
                    "Invalid or expired media link".to_string(),
                ),
                StorageError::Io(_) | StorageError::S3(_) => {
                    tracing::error!(error = %err, "Blob storage error");
                    (
                        StatusCode::BAD_GATEWAY,
                        "STORAGE_ERROR",
                        "File storage is unavailable, please try again".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": code,
        });
        if let AppError::CheckIn(CheckInRejection::TooFar { distance_km }) = &self {
            body["distance_km"] = json!(distance_km);
        }

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Foreign key violations map to 400.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown");
            match db_err.code().as_deref() {
                // PostgreSQL unique constraint violation
                Some("23505") if constraint.starts_with("uq_") => {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
                // Foreign key violation
                Some("23503") => {
                    return (
                        StatusCode::BAD_REQUEST,
                        "BAD_REQUEST",
                        format!("Referenced record does not exist ({constraint})"),
                    );
                }
                _ => {}
            }
            tracing::error!(error = %db_err, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn too_far_carries_distance() {
        let (status, body) =
            body_of(CheckInRejection::TooFar { distance_km: 0.6 }.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "TOO_FAR");
        assert_eq!(body["distance_km"], 0.6);
    }

    #[tokio::test]
    async fn rule_violations_map_by_kind() {
        let (status, body) = body_of(MatchRuleViolation::NotParticipant.into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "You are not a participant in this match");

        let (status, _) = body_of(MatchRuleViolation::AlreadyDisputed.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn storage_errors_map_by_kind() {
        let (status, _) = body_of(StorageError::NotFound("k".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = body_of(StorageError::InvalidLink("expired".into()).into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Invalid or expired media link");

        let (status, body) = body_of(StorageError::S3("bucket gone".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn internal_errors_are_sanitised() {
        let (status, body) =
            body_of(AppError::InternalError("secret detail".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "An internal error occurred");
    }
}
