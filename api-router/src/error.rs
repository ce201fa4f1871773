use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {reason}")]
    Forbidden {
        reason: String,
        matched_policy_id: Option<String>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Overloaded: {0}")]
    Overloaded(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::Forbidden {
                reason,
                matched_policy_id,
            } => Self::Forbidden {
                reason,
                matched_policy_id,
            },
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::Overloaded(msg) => Self::Overloaded(msg),
            AppError::StoreUnavailable(msg) => Self::ServiceUnavailable(msg),
            AppError::LLMUnavailable(msg) => Self::ServiceUnavailable(msg),
            AppError::Database(_) | AppError::OpenAI(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
            _ => Self::InternalError("Internal server error".to_string()),
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_policy_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, matched_policy_id) = match self {
            Self::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message, None),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message, None),
            // The matched policy id is surfaced for debuggability; the policy
            // contents are not.
            Self::Forbidden {
                reason,
                matched_policy_id,
            } => (StatusCode::FORBIDDEN, reason, matched_policy_id),
            Self::Conflict(message) => (StatusCode::CONFLICT, message, None),
            Self::Overloaded(message) => (StatusCode::TOO_MANY_REQUESTS, message, None),
            Self::ServiceUnavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message, None),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                status: "error".to_string(),
                matched_policy_id,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("resource not found".to_string());
        assert!(matches!(
            ApiError::from(not_found),
            ApiError::NotFound(msg) if msg == "resource not found"
        ));

        let validation = AppError::Validation("invalid input".to_string());
        assert!(matches!(
            ApiError::from(validation),
            ApiError::ValidationError(msg) if msg == "invalid input"
        ));

        let forbidden = AppError::forbidden("policy denied", Some("policy-1".to_string()));
        assert!(matches!(
            ApiError::from(forbidden),
            ApiError::Forbidden { matched_policy_id: Some(id), .. } if id == "policy-1"
        ));

        let overloaded = AppError::Overloaded("queue full".to_string());
        assert!(matches!(
            ApiError::from(overloaded),
            ApiError::Overloaded(_)
        ));

        let conflict = AppError::Conflict("already accepted".to_string());
        assert!(matches!(ApiError::from(conflict), ApiError::Conflict(_)));

        let unavailable = AppError::StoreUnavailable("retries exhausted".to_string());
        assert!(matches!(
            ApiError::from(unavailable),
            ApiError::ServiceUnavailable(_)
        ));

        let internal = AppError::Io(std::io::Error::other("io error"));
        assert!(matches!(ApiError::from(internal), ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::Unauthorized("not allowed".to_string()),
            StatusCode::UNAUTHORIZED,
        );
        assert_status_code(
            ApiError::Forbidden {
                reason: "denied".to_string(),
                matched_policy_id: Some("p1".to_string()),
            },
            StatusCode::FORBIDDEN,
        );
        assert_status_code(
            ApiError::Conflict("state machine".to_string()),
            StatusCode::CONFLICT,
        );
        assert_status_code(
            ApiError::Overloaded("queue full".to_string()),
            StatusCode::TOO_MANY_REQUESTS,
        );
        assert_status_code(
            ApiError::ServiceUnavailable("down".to_string()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
