//! Conversation management HTTP handlers.
//!
//! Endpoints:
//! - GET    /api/v1/conversations      - List the caller's conversations
//! - POST   /api/v1/conversations      - Create a conversation
//! - GET    /api/v1/conversations/{id} - Conversation with its messages
//! - PATCH  /api/v1/conversations/{id} - Update title / pin / archive flags
//! - DELETE /api/v1/conversations/{id} - Delete a conversation and its messages

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use domchat_core::partition::validate_identifier;
use domchat_types::chat::{Conversation, ConversationDetail, ConversationPage, ConversationPatch};

use crate::http::error::AppError;
use crate::http::extractors::query::ConversationListQuery;
use crate::http::extractors::user::UserId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/conversations`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    /// Defaults to the active bundle's partition.
    #[serde(default)]
    pub partition: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: Uuid,
    pub deleted: bool,
}

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

/// GET /api/v1/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    UserId(user): UserId,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<ApiResponse<ConversationPage>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let page = state.conversations.list(&user, query.into()).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(page, request_id, elapsed).with_link("self", "/api/v1/conversations"),
    ))
}

/// POST /api/v1/conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    UserId(user): UserId,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let partition = match body.partition {
        Some(partition) => {
            validate_identifier(&partition).map_err(|e| AppError::Validation(e.to_string()))?;
            partition
        }
        None => state.session().await.bundle().partition.clone(),
    };
    let conversation = state
        .conversations
        .create(&user, &partition, body.title)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let href = format!("/api/v1/conversations/{}", conversation.id);
    Ok(Json(
        ApiResponse::success(conversation, request_id, elapsed).with_link("self", &href),
    ))
}

/// GET /api/v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ConversationDetail>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let detail = state.conversations.detail(&user, &id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(detail, request_id, elapsed)))
}

/// PATCH /api/v1/conversations/{id}
pub async fn update_conversation(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    Json(patch): Json<ConversationPatch>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let conversation = state.conversations.update(&user, &id, patch).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(conversation, request_id, elapsed)))
}

/// DELETE /api/v1/conversations/{id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Deleted>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    state.conversations.delete(&user, &id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(
        Deleted { id, deleted: true },
        request_id,
        elapsed,
    )))
}
