use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use serde::Deserialize;
use uuid::Uuid;

use warden_types::api::{Claims, QueueItemResponse, QueueListResponse, ReportMessageRequest};
use warden_types::models::{QueueStatus, Resolution, Role};

use crate::envelope::{ApiError, ApiResult, created, ok};
use crate::middleware::require_role;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub status: Option<String>,
}

pub async fn get_queue(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<QueueQuery>, QueryRejection>,
) -> ApiResult {
    require_role(&claims, Role::Moderator)?;
    let Query(query) = query?;

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<QueueStatus>())
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let items = state.moderation.service.queue().get_queue(status).await?;
    ok(QueueListResponse { items })
}

pub async fn claim_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult {
    require_role(&claims, Role::Moderator)?;
    let Path(id) = id?;

    let item = state.moderation.service.queue().claim(id, claims.sub).await?;
    ok(QueueItemResponse { item })
}

pub async fn resolve_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<Resolution>, JsonRejection>,
) -> ApiResult {
    require_role(&claims, Role::Moderator)?;
    let Path(id) = id?;
    let Json(resolution) = payload?;

    let item = state
        .moderation
        .service
        .queue()
        .resolve(id, claims.sub, resolution)
        .await?;
    ok(QueueItemResponse { item })
}

/// Any signed-in user may report a message.
pub async fn report_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ReportMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;

    let item = state
        .moderation
        .service
        .queue()
        .report(req.message_id, claims.sub, &req.reason)
        .await?;
    created(QueueItemResponse { item })
}
