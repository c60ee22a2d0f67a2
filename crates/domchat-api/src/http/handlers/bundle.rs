//! Bundle HTTP handlers.
//!
//! Endpoints:
//! - GET  /api/v1/bundle        - Active bundle summary
//! - GET  /api/v1/bundles       - Available bundle ids
//! - POST /api/v1/bundle/reload - Drop cached configuration and rebuild the session

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use uuid::Uuid;

use domchat_types::bundle::UiMetadata;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::{ActiveSession, AppState};

/// What the chat UI needs to render the active domain.
#[derive(Debug, Serialize)]
pub struct BundleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub partition: String,
    pub agent_name: String,
    pub model: String,
    pub ui: UiMetadata,
    pub capabilities: Vec<String>,
    pub warnings: Vec<String>,
}

impl From<&ActiveSession> for BundleSummary {
    fn from(active: &ActiveSession) -> Self {
        let session = active.runtime.session();
        let bundle = session.bundle();
        Self {
            id: bundle.id.clone(),
            name: bundle.display.name.clone(),
            description: bundle.display.description.clone(),
            version: bundle.display.version.clone(),
            partition: bundle.partition.clone(),
            agent_name: bundle.agent.name.clone(),
            model: bundle.agent.model.clone(),
            ui: bundle.ui.clone(),
            capabilities: session
                .capabilities()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            warnings: active.warnings.clone(),
        }
    }
}

/// GET /api/v1/bundle
pub async fn get_bundle(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<BundleSummary>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let summary = BundleSummary::from(&state.session().await);

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(summary, request_id, elapsed).with_link("self", "/api/v1/bundle"),
    ))
}

/// GET /api/v1/bundles
pub async fn list_bundles(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<String>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let ids = state.resolver.list_bundles().await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(ids, request_id, elapsed)))
}

/// POST /api/v1/bundle/reload
///
/// Connections already open keep the session they started with.
pub async fn reload_bundle(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<BundleSummary>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let active = state.reload().await.inspect_err(|e| {
        tracing::warn!(error = %e, "Bundle reload failed; keeping previous session");
    })?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(
        BundleSummary::from(&active),
        request_id,
        elapsed,
    )))
}
