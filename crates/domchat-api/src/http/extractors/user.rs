//! Caller identity extractor.
//!
//! Authentication is out of scope; the caller names itself via:
//! - `X-User-Id: <id>` header
//! - `user_id=<id>` query parameter
//!
//! and falls back to [`ANONYMOUS_USER`].

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::http::error::AppError;

pub const ANONYMOUS_USER: &str = "anonymous";
pub const USER_HEADER: &str = "x-user-id";
const MAX_USER_ID_LEN: usize = 128;

/// The user a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(USER_HEADER) {
            let value = value
                .to_str()
                .map_err(|_| AppError::Validation("Invalid X-User-Id header encoding".to_string()))?;
            return normalize(value);
        }

        let from_query = Query::<UserQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.user_id);
        match from_query {
            Some(value) => normalize(&value),
            None => Ok(UserId(ANONYMOUS_USER.to_string())),
        }
    }
}

fn normalize(raw: &str) -> Result<UserId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(UserId(ANONYMOUS_USER.to_string()));
    }
    if trimmed.len() > MAX_USER_ID_LEN || trimmed.chars().any(char::is_control) {
        return Err(AppError::Validation("Invalid user id".to_string()));
    }
    Ok(UserId(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(request: Request<()>) -> Result<UserId, AppError> {
        let (mut parts, _) = request.into_parts();
        UserId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_header_wins_over_query() {
        let request = Request::builder()
            .uri("/api/v1/conversations?user_id=bob")
            .header("X-User-Id", "alice")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap(), UserId("alice".into()));
    }

    #[tokio::test]
    async fn test_query_then_default() {
        let request = Request::builder().uri("/ws/chat?user_id=bob").body(()).unwrap();
        assert_eq!(extract(request).await.unwrap(), UserId("bob".into()));

        let request = Request::builder().uri("/ws/chat").body(()).unwrap();
        assert_eq!(extract(request).await.unwrap(), UserId(ANONYMOUS_USER.into()));
    }

    #[tokio::test]
    async fn test_oversized_id_rejected() {
        let request = Request::builder()
            .uri("/")
            .header("X-User-Id", "x".repeat(200))
            .body(())
            .unwrap();
        assert!(matches!(extract(request).await, Err(AppError::Validation(_))));
    }
}
