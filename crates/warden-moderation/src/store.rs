//! Storage ports. The moderation core only talks to persistence through these
//! traits; `crate::sqlite` implements them over `warden_db::Database`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use warden_types::models::{
    Appeal, AppealStatus, ContentSafetyRule, Message, ModerationStats, QueueItem, QueueStatus,
    Resolution, User, UserBan, Verdict,
};

use crate::context::RelationFacts;
use crate::error::Result;

/// Outcome of a guarded state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    /// The transition happened; carries the record after the write.
    Applied(T),
    /// The record was already in the requested state for this actor.
    Unchanged(T),
    /// The record's current state does not allow the transition.
    Rejected(T),
    NotFound,
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<ContentSafetyRule>>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<ContentSafetyRule>>;

    /// Insert or replace by `(pattern, category)`.
    async fn upsert_rule(&self, rule: ContentSafetyRule) -> Result<ContentSafetyRule>;

    /// Overwrite by id. `NotFound` for unknown ids, `Conflict` when the new
    /// `(pattern, category)` belongs to another rule.
    async fn update_rule(&self, rule: ContentSafetyRule) -> Result<ContentSafetyRule>;

    /// Returns false if no rule had that id.
    async fn delete_rule(&self, id: Uuid) -> Result<bool>;
}

/// Read-only view of the message/section store.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>>;

    /// The account behind a message's `author_id`, if it is known.
    async fn get_author(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Newest first, excluding `exclude`.
    async fn recent_messages(&self, section_id: Uuid, exclude: Uuid, limit: u32) -> Result<Vec<Message>>;

    /// Most recently active first.
    async fn section_participants(&self, section_id: Uuid, limit: u32) -> Result<Vec<Uuid>>;

    async fn section_metadata(&self, section_id: Uuid) -> Result<HashMap<String, serde_json::Value>>;

    async fn relation_facts(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, RelationFacts>>;
}

/// Write side of the message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message with its verdict and, for held messages, its review
    /// item in one write. Returns the stored item. On error nothing is written.
    async fn publish(&self, message: &Message, verdict: &Verdict, item: Option<QueueItem>) -> Result<Option<QueueItem>>;
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert, or refresh the verdict of the open item for the same message.
    async fn upsert_item(&self, item: QueueItem) -> Result<QueueItem>;

    async fn get_item(&self, id: Uuid) -> Result<Option<QueueItem>>;

    async fn open_item_for_message(&self, message_id: Uuid) -> Result<Option<QueueItem>>;

    /// Highest severity first, then oldest first.
    async fn list_items(&self, statuses: &[QueueStatus]) -> Result<Vec<QueueItem>>;

    async fn count_open(&self) -> Result<u64>;

    /// QUEUED/FLAGGED -> IN_REVIEW as a compare-and-set.
    async fn claim(&self, id: Uuid, moderator_id: Uuid, at: DateTime<Utc>) -> Result<Transition<QueueItem>>;

    /// IN_REVIEW -> RESOLVED for the claiming moderator, writing `ban` (and the
    /// author's BANNED status) in the same transaction.
    async fn resolve(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        resolution: &Resolution,
        at: DateTime<Utc>,
        ban: Option<UserBan>,
    ) -> Result<Transition<QueueItem>>;
}

#[async_trait]
pub trait AppealRepository: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Bans in force as of `now`, newest first.
    async fn active_bans(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<UserBan>>;

    async fn pending_appeal(&self, user_id: Uuid) -> Result<Option<Appeal>>;

    /// Returns false when another PENDING appeal for the user won the race.
    async fn insert_appeal(&self, appeal: &Appeal) -> Result<bool>;

    async fn get_appeal(&self, id: Uuid) -> Result<Option<Appeal>>;

    async fn list_appeals(&self, status: Option<AppealStatus>) -> Result<Vec<Appeal>>;

    /// PENDING -> `status` exactly once. With `lift_bans`, every active ban of the
    /// user is deactivated and the user restored to ACTIVE in the same transaction.
    async fn review_appeal(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        status: AppealStatus,
        response: Option<String>,
        at: DateTime<Utc>,
        lift_bans: bool,
    ) -> Result<Transition<Appeal>>;
}

#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Write-once; false if the window was already persisted.
    async fn insert_stats(&self, stats: &ModerationStats) -> Result<bool>;

    async fn recent_stats(&self, limit: u32) -> Result<Vec<ModerationStats>>;
}
