/// Database row types, mapped directly from SQLite rows.
/// Distinct from warden-types models to keep the DB layer independent.
/// Timestamps are RFC 3339 strings with a fixed width, so they sort as text.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub role: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub section_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
}

/// Per-user violation history used to build relationship facts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationRow {
    pub user_id: String,
    pub removed_messages: i64,
    pub bans: i64,
}

#[derive(Debug, Clone)]
pub struct RuleRow {
    pub id: String,
    pub pattern: String,
    pub category: String,
    pub severity: String,
    pub action: String,
    pub enabled: bool,
    pub created_by: String,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct QueueItemRow {
    pub id: String,
    pub message_id: String,
    pub status: String,
    pub severity_rank: i64,
    /// JSON-encoded verdict
    pub verdict: String,
    pub created_at: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<String>,
    /// JSON-encoded resolution
    pub resolution: Option<String>,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BanRow {
    pub id: String,
    pub user_id: String,
    pub issued_by: String,
    pub reason: String,
    pub custom_reason: Option<String>,
    pub thread_id: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AppealRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub reason: String,
    pub status: String,
    pub moderator_id: Option<String>,
    pub response: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRow {
    /// Unix seconds
    pub window_start: i64,
    pub window_end: i64,
    pub allow_count: i64,
    pub flag_count: i64,
    pub queue_count: i64,
    pub block_count: i64,
    pub total_evaluated: i64,
}
