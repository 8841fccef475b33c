use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::messages;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}: {1}")]
    Unauthorized(&'static str, String),
    #[error("{0}: {1}")]
    Forbidden(&'static str, String),
    #[error("{0}: {1}")]
    BadRequest(&'static str, String),
    #[error("{0}: {1}")]
    NotFound(&'static str, String),
    #[error("{0}: {1}")]
    Conflict(&'static str, String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", messages::INVALID_CREDENTIALS.into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", messages::SESSION_EXPIRED.into())
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("FORBIDDEN", messages::UNAUTHORIZED.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(message: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", message.into())
    }

    pub fn conflict(message: &str) -> Self {
        ApiError::Conflict("CONFLICT", message.into())
    }

    /// Unique violations become a 409, everything else is an internal error.
    pub fn db(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref dbe) = e {
            if dbe.is_unique_violation() {
                return ApiError::Conflict("DUPLICATE", "record already exists".into());
            }
        }
        ApiError::Internal(format!("db error: {e}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthorized(code, msg)
            | ApiError::Forbidden(code, msg)
            | ApiError::BadRequest(code, msg)
            | ApiError::NotFound(code, msg)
            | ApiError::Conflict(code, msg) => {
                (status, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (status, ApiError::to_error_response("INTERNAL", "internal server error"))
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_variant() {
        assert_eq!(ApiError::forbidden().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::session_expired().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn forbidden_uses_catalogue_message() {
        match ApiError::forbidden() {
            ApiError::Forbidden(code, msg) => {
                assert_eq!(code, "FORBIDDEN");
                assert_eq!(msg, messages::MSG26);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_database_sqlx_errors_are_internal() {
        let err = ApiError::db(sqlx::Error::RowNotFound);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
