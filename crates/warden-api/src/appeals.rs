use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use serde::Deserialize;
use uuid::Uuid;

use warden_types::api::{AppealListResponse, AppealResponse, Claims, ReviewAppealRequest, SubmitAppealRequest};
use warden_types::models::{AppealStatus, Role};

use crate::envelope::{ApiError, ApiResult, created, ok};
use crate::middleware::require_role;
use crate::state::AppState;

/// The caller appeals their own ban; eligibility is checked by the workflow.
pub async fn submit_appeal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SubmitAppealRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;

    let appeal = state
        .moderation
        .appeals
        .submit_appeal(claims.sub, req.message_id, &req.reason)
        .await?;
    created(AppealResponse { appeal })
}

pub async fn review_appeal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ReviewAppealRequest>, JsonRejection>,
) -> ApiResult {
    require_role(&claims, Role::Moderator)?;
    let Path(id) = id?;
    let Json(req) = payload?;

    if req.id.is_some_and(|body_id| body_id != id) {
        return Err(ApiError::validation("body id does not match path id"));
    }

    let appeal = state
        .moderation
        .appeals
        .review_appeal(id, claims.sub, req.decision, req.response)
        .await?;
    ok(AppealResponse { appeal })
}

/// Moderators see any appeal; users only their own.
pub async fn get_appeal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;

    let appeal = state.moderation.appeals.get_appeal(id).await?;
    if appeal.user_id != claims.sub {
        require_role(&claims, Role::Moderator)?;
    }
    ok(AppealResponse { appeal })
}

#[derive(Debug, Deserialize)]
pub struct AppealQuery {
    pub status: Option<String>,
}

pub async fn list_appeals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<AppealQuery>, QueryRejection>,
) -> ApiResult {
    require_role(&claims, Role::Moderator)?;
    let Query(query) = query?;

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<AppealStatus>())
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let appeals = state.moderation.appeals.list_appeals(status).await?;
    ok(AppealListResponse { appeals })
}
