use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Action, Appeal, AppealDecision, ContentSafetyRule, Message, ModerationStats, QueueItem,
    Role, Severity,
};

// -- JWT Claims --

/// Bearer token claims. Tokens are minted by the platform's auth service;
/// this crate only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Envelope --

/// Uniform response wrapper used by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
}

impl ResponseMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: Uuid::new_v4(),
        }
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: Message,
}

// -- Queue --

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueListResponse {
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueItemResponse {
    pub item: QueueItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportMessageRequest {
    pub message_id: Uuid,
    pub reason: String,
}

// -- Rules --

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleListResponse {
    pub rules: Vec<ContentSafetyRule>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleResponse {
    pub rule: ContentSafetyRule,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRuleRequest {
    pub pattern: String,
    pub category: String,
    pub action: Action,
    pub severity: Option<Severity>,
    pub metadata: Option<serde_json::Value>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateRuleRequest {
    pub id: Uuid,
    pub pattern: Option<String>,
    pub category: Option<String>,
    pub action: Option<Action>,
    pub severity: Option<Severity>,
    pub metadata: Option<serde_json::Value>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteRuleRequest {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub success: bool,
}

// -- Stats --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub latest_stats: Vec<ModerationStats>,
    pub queue_size: u64,
}

// -- Appeals --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitAppealRequest {
    pub message_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReviewAppealRequest {
    /// Optional echo of the path id; rejected when it disagrees.
    pub id: Option<Uuid>,
    pub decision: AppealDecision,
    pub response: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppealResponse {
    pub appeal: Appeal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppealListResponse {
    pub appeals: Vec<Appeal>,
}
