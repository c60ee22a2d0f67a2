//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use domchat_types::error::{ConfigError, RepositoryError, ServiceError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Conversation management errors.
    Conversation(ServiceError),
    /// Bundle resolution errors.
    Config(ConfigError),
    /// Request validation error.
    Validation(String),
    /// Generic internal error. The text is logged, never returned.
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        AppError::Conversation(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Conversation(ServiceError::NotFound)
            | AppError::Conversation(ServiceError::Repository(RepositoryError::NotFound)) => (
                StatusCode::NOT_FOUND,
                "CONVERSATION_NOT_FOUND",
                "Conversation not found".to_string(),
            ),
            AppError::Conversation(ServiceError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Conversation(ServiceError::Repository(RepositoryError::Conflict(msg))) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            AppError::Conversation(ServiceError::Repository(_)) => internal(),
            AppError::Config(ConfigError::NotFound(what)) => (
                StatusCode::NOT_FOUND,
                "BUNDLE_NOT_FOUND",
                format!("Configuration not found: {what}"),
            ),
            AppError::Config(e @ (ConfigError::Malformed { .. } | ConfigError::Cycle(_))) => {
                (StatusCode::CONFLICT, "CONFIG_INVALID", e.to_string())
            }
            AppError::Config(ConfigError::Io(_)) => internal(),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(_) => internal(),
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "Request failed");
        }

        let body = ApiResponse::error(code, &message, String::new(), 0);
        let body = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"errors":[{"code":"SERIALIZATION_ERROR","message":"Failed to serialize response"}]}"#.to_string()
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::from(ServiceError::NotFound), StatusCode::NOT_FOUND),
            (
                AppError::from(ServiceError::Validation("empty".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(ServiceError::Repository(RepositoryError::Conflict("dup".into()))),
                StatusCode::CONFLICT,
            ),
            (
                AppError::from(ConfigError::NotFound("domains/x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::from(ConfigError::Cycle("a -> b -> a".into())),
                StatusCode::CONFLICT,
            ),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_cause_not_exposed() {
        let err = AppError::from(ServiceError::Repository(RepositoryError::Query(
            "no such table: conversations".into(),
        )));
        let (_, code, message) = err.parts();
        assert_eq!(code, "INTERNAL_ERROR");
        assert!(!message.contains("conversations"));
    }
}
