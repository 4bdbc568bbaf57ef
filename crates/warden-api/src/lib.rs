pub mod appeals;
pub mod envelope;
pub mod messages;
pub mod middleware;
pub mod notify;
pub mod queue;
pub mod rules;
pub mod state;
pub mod stats;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::state::AppState;

/// Every route requires a valid bearer token; handlers check roles.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sections/{section_id}/messages", post(messages::submit_message))
        .route("/moderation/queue", get(queue::get_queue))
        .route("/moderation/queue/{id}/claim", post(queue::claim_item))
        .route("/moderation/queue/{id}/resolve", post(queue::resolve_item))
        .route("/moderation/reports", post(queue::report_message))
        .route(
            "/moderation/rules",
            get(rules::list_rules)
                .post(rules::create_rule)
                .put(rules::update_rule)
                .delete(rules::delete_rule),
        )
        .route("/moderation/stats", get(stats::get_stats))
        .route("/moderation/appeals", get(appeals::list_appeals))
        .route("/moderation/appeals/submit", post(appeals::submit_appeal))
        .route("/moderation/appeals/{id}", get(appeals::get_appeal))
        .route("/moderation/appeals/review/{id}", post(appeals::review_appeal))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
