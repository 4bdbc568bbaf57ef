use axum::{
    Extension,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

use warden_types::api::{Claims, StatsResponse};
use warden_types::models::Role;

use crate::envelope::{ApiResult, ok};
use crate::middleware::require_role;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    24
}

pub async fn get_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> ApiResult {
    require_role(&claims, Role::Moderator)?;
    let Query(query) = query?;

    let service = &state.moderation.service;
    let latest_stats = service.stats().get_recent_stats(query.limit).await?;
    let queue_size = service.queue().queue_size().await?;
    ok(StatsResponse {
        latest_stats,
        queue_size,
    })
}
