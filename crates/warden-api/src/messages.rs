use axum::{
    Extension, Json,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
};
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use warden_moderation::ModerationError;
use warden_types::api::{Claims, MessageResponse, SubmitMessageRequest};
use warden_types::models::{Action, Message};

use crate::envelope::{ApiError, ApiResult, created};
use crate::state::AppState;

const MAX_CONTENT_CHARS: usize = 4000;

/// Post a message through moderation. Held messages look exactly like
/// published ones to the author; only BLOCK is reported as a rejection.
pub async fn submit_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    section_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SubmitMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Path(section_id) = section_id?;
    let Json(req) = payload?;

    let content = req.content.trim();
    if content.is_empty() {
        return Err(ApiError::validation("content must not be empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::validation(format!(
            "content exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let author = match state.moderation.appeals.user(claims.sub).await {
        Ok(user) => user,
        Err(ModerationError::NotFound(_)) => return Err(ApiError::auth_required("unknown user")),
        Err(e) => return Err(e.into()),
    };
    if author.status.is_sanctioned() {
        return Err(ApiError::auth_required("account is restricted"));
    }

    let message = Message {
        id: Uuid::new_v4(),
        section_id,
        author_id: author.id,
        content: content.to_string(),
        created_at: Utc::now(),
    };

    let outcome = state.moderation.service.moderate(message.clone()).await?;
    if outcome.verdict.action == Action::Block {
        return Err(ApiError::validation("message violates content rules")
            .with_details(json!({ "reason": "content_blocked" })));
    }

    info!(message_id = %message.id, section_id = %section_id, "Message accepted");
    created(MessageResponse { message })
}
