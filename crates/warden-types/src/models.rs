use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned by the `FromStr` impls below when a stored or submitted label is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

fn unknown<T>(kind: &'static str, value: &str) -> Result<T, UnknownVariant> {
    Err(UnknownVariant {
        kind,
        value: value.to_string(),
    })
}

// -- Severity / Action --

/// Ordered from least to most severe, so `Ord` gives the triage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Numeric rank stored alongside queue items so SQL can sort by it.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => unknown("severity", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allow,
    Flag,
    Queue,
    Block,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Flag => "FLAG",
            Self::Queue => "QUEUE",
            Self::Block => "BLOCK",
        }
    }

    /// Precedence used when severities tie: BLOCK > QUEUE > FLAG > ALLOW.
    /// QUEUE and FLAG both route to human review; QUEUE only wins the tie so
    /// the combined result never depends on filter order.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Flag => 1,
            Self::Queue => 2,
            Self::Block => 3,
        }
    }

    /// FLAG and QUEUE verdicts put the message in front of a moderator.
    pub fn needs_review(&self) -> bool {
        matches!(self, Self::Flag | Self::Queue)
    }
}

impl FromStr for Action {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALLOW" => Ok(Self::Allow),
            "FLAG" => Ok(Self::Flag),
            "QUEUE" => Ok(Self::Queue),
            "BLOCK" => Ok(Self::Block),
            other => unknown("action", other),
        }
    }
}

// -- Rules --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSafetyRule {
    pub id: Uuid,
    pub pattern: String,
    pub category: String,
    pub severity: Severity,
    pub action: Action,
    pub enabled: bool,
    pub created_by: Uuid,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Verdicts --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub action: Action,
    pub severity: Severity,
    pub matched_rule_ids: Vec<Uuid>,
    pub confidence: f32,
    pub reason: String,
}

impl Verdict {
    /// Default outcome when nothing had an opinion.
    pub fn allow() -> Self {
        Self {
            action: Action::Allow,
            severity: Severity::Low,
            matched_rule_ids: Vec::new(),
            confidence: 0.0,
            reason: String::new(),
        }
    }

    /// Restrictive outcome used whenever evaluation could not complete.
    pub fn fail_closed(reason: &str) -> Self {
        Self {
            action: Action::Queue,
            severity: Severity::Medium,
            matched_rule_ids: Vec::new(),
            confidence: 0.0,
            reason: reason.to_string(),
        }
    }
}

// -- Messages --

/// The slice of a discussion message the moderation pipeline needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub section_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Queue --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Queued,
    Flagged,
    InReview,
    Resolved,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Flagged => "FLAGGED",
            Self::InReview => "IN_REVIEW",
            Self::Resolved => "RESOLVED",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "FLAGGED" => Ok(Self::Flagged),
            "IN_REVIEW" => Ok(Self::InReview),
            "RESOLVED" => Ok(Self::Resolved),
            other => unknown("queue status", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionOutcome {
    /// Content is fine; nothing further happens.
    Dismiss,
    /// Content is removed, author keeps posting rights.
    RemoveContent,
    /// Content is removed and the author is banned.
    BanAuthor,
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dismiss => "DISMISS",
            Self::RemoveContent => "REMOVE_CONTENT",
            Self::BanAuthor => "BAN_AUTHOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub outcome: ResolutionOutcome,
    #[serde(default)]
    pub note: Option<String>,
    /// Only meaningful for `BAN_AUTHOR`; absent means a permanent ban.
    #[serde(default)]
    pub ban_duration_hours: Option<u32>,
}

impl Resolution {
    pub fn sanctions_author(&self) -> bool {
        self.outcome == ResolutionOutcome::BanAuthor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    pub message_id: Uuid,
    pub status: QueueStatus,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
    pub claimed_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolution: Option<Resolution>,
}

// -- Users / bans / appeals --

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Moderator => "MODERATOR",
            Self::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "MODERATOR" => Ok(Self::Moderator),
            "ADMIN" => Ok(Self::Admin),
            other => unknown("role", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Suspended,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Banned => "BANNED",
        }
    }

    pub fn is_sanctioned(&self) -> bool {
        matches!(self, Self::Suspended | Self::Banned)
    }
}

impl FromStr for UserStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "SUSPENDED" => Ok(Self::Suspended),
            "BANNED" => Ok(Self::Banned),
            other => unknown("user status", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub issued_by: Uuid,
    pub reason: String,
    pub custom_reason: Option<String>,
    pub thread_id: Option<Uuid>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppealStatus {
    Pending,
    Approved,
    Denied,
}

impl AppealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
        }
    }
}

impl FromStr for AppealStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "DENIED" => Ok(Self::Denied),
            other => unknown("appeal status", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppealDecision {
    Approve,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appeal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub reason: String,
    pub status: AppealStatus,
    pub moderator_id: Option<Uuid>,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// -- Stats --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCounts {
    pub allow: u64,
    pub flag: u64,
    pub queue: u64,
    pub block: u64,
}

impl ActionCounts {
    pub fn total(&self) -> u64 {
        self.allow + self.flag + self.queue + self.block
    }
}

/// Immutable rollup of one closed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationStats {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub counts: ActionCounts,
    pub total_evaluated: u64,
}
