use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};

use warden_moderation::rules::{RuleInput, RulePatch};
use warden_types::api::{
    Claims, CreateRuleRequest, DeleteRuleRequest, DeletedResponse, RuleListResponse, RuleResponse,
    UpdateRuleRequest,
};
use warden_types::models::{Role, Severity};

use crate::envelope::{ApiResult, created, ok};
use crate::middleware::require_role;
use crate::state::AppState;

pub async fn list_rules(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> ApiResult {
    require_role(&claims, Role::Moderator)?;

    let rules = state.moderation.service.rules().list_rules().await?;
    ok(RuleListResponse { rules })
}

pub async fn create_rule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> ApiResult {
    require_role(&claims, Role::Admin)?;
    let Json(req) = payload?;

    let rule = state
        .moderation
        .service
        .rules()
        .upsert_rule(RuleInput {
            pattern: req.pattern,
            category: req.category,
            severity: req.severity.unwrap_or(Severity::Medium),
            action: req.action,
            created_by: claims.sub,
            metadata: req.metadata,
            enabled: req.enabled.unwrap_or(true),
        })
        .await?;
    created(RuleResponse { rule })
}

pub async fn update_rule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateRuleRequest>, JsonRejection>,
) -> ApiResult {
    require_role(&claims, Role::Admin)?;
    let Json(req) = payload?;

    let patch = RulePatch {
        pattern: req.pattern,
        category: req.category,
        severity: req.severity,
        action: req.action,
        metadata: req.metadata,
        enabled: req.enabled,
    };
    let rule = state.moderation.service.rules().update_rule(req.id, patch).await?;
    ok(RuleResponse { rule })
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<DeleteRuleRequest>, JsonRejection>,
) -> ApiResult {
    require_role(&claims, Role::Admin)?;
    let Json(req) = payload?;

    state.moderation.service.rules().delete_rule(req.id).await?;
    ok(DeletedResponse { success: true })
}
