//! `warden_db::Database` behind the async store ports. Every call runs on the
//! blocking pool. Lock contention surfaces as `Transient`; every other database
//! failure, and rows that do not decode, are `Internal`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use uuid::Uuid;

use warden_db::Database;
use warden_db::appeals::{AppealDecisionRecord, AppealReview};
use warden_db::models::{AppealRow, BanRow, MessageRow, QueueItemRow, RuleRow, StatsRow, UserRow};
use warden_db::queue::{ClaimOutcome, ResolutionRecord, ResolveOutcome};
use warden_db::rules::RuleUpdate;
use warden_types::models::{
    ActionCounts, Appeal, AppealStatus, ContentSafetyRule, Message, ModerationStats, QueueItem, QueueStatus,
    Resolution, User, UserBan, Verdict,
};

use crate::context::RelationFacts;
use crate::error::{ModerationError, Result};
use crate::store::{
    AppealRepository, MessageSource, MessageStore, QueueRepository, RuleRepository, StatsRepository, Transition,
};

/// Fixed-width RFC 3339, so stored timestamps sort as text.
pub fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", raw, e))
}

fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| corrupt("id", raw, e))
}

fn parse_opt_id(raw: Option<&str>) -> Result<Option<Uuid>> {
    raw.map(parse_id).transpose()
}

fn parse_label<T: FromStr>(raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| corrupt("label", raw, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| corrupt("json column", raw, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ModerationError::Internal(format!("encode failed: {}", e)))
}

fn corrupt(what: &str, raw: &str, e: impl std::fmt::Display) -> ModerationError {
    ModerationError::Internal(format!("stored {} '{}' is invalid: {}", what, raw, e))
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ModerationError::Internal(format!("store task failed: {}", e)))?
            .map_err(|e| {
                if warden_db::is_retryable(&e) {
                    ModerationError::Transient(format!("{:#}", e))
                } else {
                    ModerationError::Internal(format!("{:#}", e))
                }
            })
    }
}

// -- Row conversions --

fn rule_from_row(row: RuleRow) -> Result<ContentSafetyRule> {
    Ok(ContentSafetyRule {
        id: parse_id(&row.id)?,
        severity: parse_label(&row.severity)?,
        action: parse_label(&row.action)?,
        enabled: row.enabled,
        created_by: parse_id(&row.created_by)?,
        metadata: row.metadata.as_deref().map(parse_json).transpose()?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
        pattern: row.pattern,
        category: row.category,
    })
}

fn rule_to_row(rule: &ContentSafetyRule) -> Result<RuleRow> {
    Ok(RuleRow {
        id: rule.id.to_string(),
        pattern: rule.pattern.clone(),
        category: rule.category.clone(),
        severity: rule.severity.as_str().into(),
        action: rule.action.as_str().into(),
        enabled: rule.enabled,
        created_by: rule.created_by.to_string(),
        metadata: rule.metadata.as_ref().map(to_json).transpose()?,
        created_at: fmt_ts(rule.created_at),
        updated_at: fmt_ts(rule.updated_at),
    })
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: parse_id(&row.id)?,
        section_id: parse_id(&row.section_id)?,
        author_id: parse_id(&row.author_id)?,
        created_at: parse_ts(&row.created_at)?,
        content: row.content,
    })
}

fn queue_item_from_row(row: QueueItemRow) -> Result<QueueItem> {
    Ok(QueueItem {
        id: parse_id(&row.id)?,
        message_id: parse_id(&row.message_id)?,
        status: parse_label(&row.status)?,
        verdict: parse_json(&row.verdict)?,
        created_at: parse_ts(&row.created_at)?,
        claimed_by: parse_opt_id(row.claimed_by.as_deref())?,
        resolved_at: parse_opt_ts(row.resolved_at.as_deref())?,
        resolved_by: parse_opt_id(row.resolved_by.as_deref())?,
        resolution: row.resolution.as_deref().map(parse_json).transpose()?,
    })
}

fn queue_item_to_row(item: &QueueItem) -> Result<QueueItemRow> {
    Ok(QueueItemRow {
        id: item.id.to_string(),
        message_id: item.message_id.to_string(),
        status: item.status.as_str().into(),
        severity_rank: item.verdict.severity.rank(),
        verdict: to_json(&item.verdict)?,
        created_at: fmt_ts(item.created_at),
        claimed_by: item.claimed_by.map(|id| id.to_string()),
        claimed_at: None,
        resolved_at: item.resolved_at.map(fmt_ts),
        resolved_by: item.resolved_by.map(|id| id.to_string()),
        resolution: item.resolution.as_ref().map(to_json).transpose()?,
        outcome: item.resolution.as_ref().map(|r| r.outcome.as_str().to_string()),
    })
}

fn user_from_row(row: UserRow) -> Result<User> {
    Ok(User {
        id: parse_id(&row.id)?,
        role: parse_label(&row.role)?,
        status: parse_label(&row.status)?,
        created_at: parse_ts(&row.created_at)?,
        username: row.username,
    })
}

fn ban_from_row(row: BanRow) -> Result<UserBan> {
    Ok(UserBan {
        id: parse_id(&row.id)?,
        user_id: parse_id(&row.user_id)?,
        issued_by: parse_id(&row.issued_by)?,
        thread_id: parse_opt_id(row.thread_id.as_deref())?,
        is_active: row.is_active,
        expires_at: parse_opt_ts(row.expires_at.as_deref())?,
        created_at: parse_ts(&row.created_at)?,
        reason: row.reason,
        custom_reason: row.custom_reason,
    })
}

fn ban_to_row(ban: &UserBan) -> BanRow {
    BanRow {
        id: ban.id.to_string(),
        user_id: ban.user_id.to_string(),
        issued_by: ban.issued_by.to_string(),
        reason: ban.reason.clone(),
        custom_reason: ban.custom_reason.clone(),
        thread_id: ban.thread_id.map(|id| id.to_string()),
        is_active: ban.is_active,
        expires_at: ban.expires_at.map(fmt_ts),
        created_at: fmt_ts(ban.created_at),
    }
}

fn appeal_from_row(row: AppealRow) -> Result<Appeal> {
    Ok(Appeal {
        id: parse_id(&row.id)?,
        user_id: parse_id(&row.user_id)?,
        message_id: parse_id(&row.message_id)?,
        status: parse_label(&row.status)?,
        moderator_id: parse_opt_id(row.moderator_id.as_deref())?,
        created_at: parse_ts(&row.created_at)?,
        resolved_at: parse_opt_ts(row.resolved_at.as_deref())?,
        reason: row.reason,
        response: row.response,
    })
}

fn appeal_to_row(appeal: &Appeal) -> AppealRow {
    AppealRow {
        id: appeal.id.to_string(),
        user_id: appeal.user_id.to_string(),
        message_id: appeal.message_id.to_string(),
        reason: appeal.reason.clone(),
        status: appeal.status.as_str().into(),
        moderator_id: appeal.moderator_id.map(|id| id.to_string()),
        response: appeal.response.clone(),
        created_at: fmt_ts(appeal.created_at),
        resolved_at: appeal.resolved_at.map(fmt_ts),
    }
}

fn stats_from_row(row: StatsRow) -> Result<ModerationStats> {
    let unix = |secs: i64| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| corrupt("window bound", &secs.to_string(), "out of range"))
    };
    Ok(ModerationStats {
        window_start: unix(row.window_start)?,
        window_end: unix(row.window_end)?,
        counts: ActionCounts {
            allow: count(row.allow_count),
            flag: count(row.flag_count),
            queue: count(row.queue_count),
            block: count(row.block_count),
        },
        total_evaluated: count(row.total_evaluated),
    })
}

fn stats_to_row(stats: &ModerationStats) -> StatsRow {
    let n = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
    StatsRow {
        window_start: stats.window_start.timestamp(),
        window_end: stats.window_end.timestamp(),
        allow_count: n(stats.counts.allow),
        flag_count: n(stats.counts.flag),
        queue_count: n(stats.counts.queue),
        block_count: n(stats.counts.block),
        total_evaluated: n(stats.total_evaluated),
    }
}

fn decode_all<R, T>(rows: Vec<R>, f: fn(R) -> Result<T>) -> Result<Vec<T>> {
    rows.into_iter().map(f).collect()
}

// -- Ports --

#[async_trait]
impl RuleRepository for SqliteStore {
    async fn list_rules(&self) -> Result<Vec<ContentSafetyRule>> {
        let rows = self.blocking(|db| db.list_rules()).await?;
        decode_all(rows, rule_from_row)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<ContentSafetyRule>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_rule(&id)).await?;
        row.map(rule_from_row).transpose()
    }

    async fn upsert_rule(&self, rule: ContentSafetyRule) -> Result<ContentSafetyRule> {
        let row = rule_to_row(&rule)?;
        let stored = self.blocking(move |db| db.upsert_rule(&row)).await?;
        rule_from_row(stored)
    }

    async fn update_rule(&self, rule: ContentSafetyRule) -> Result<ContentSafetyRule> {
        let row = rule_to_row(&rule)?;
        match self.blocking(move |db| db.update_rule(&row)).await? {
            RuleUpdate::Updated(row) => rule_from_row(row),
            RuleUpdate::NotFound => Err(ModerationError::NotFound(format!("rule {}", rule.id))),
            RuleUpdate::Collision { existing_id } => Err(ModerationError::Conflict(format!(
                "rule {} already uses this pattern and category",
                existing_id
            ))),
        }
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |db| db.delete_rule(&id)).await
    }
}

#[async_trait]
impl MessageSource for SqliteStore {
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_message(&id)).await?;
        row.map(message_from_row).transpose()
    }

    async fn get_author(&self, user_id: Uuid) -> Result<Option<User>> {
        let id = user_id.to_string();
        let row = self.blocking(move |db| db.get_user_by_id(&id)).await?;
        row.map(user_from_row).transpose()
    }

    async fn recent_messages(&self, section_id: Uuid, exclude: Uuid, limit: u32) -> Result<Vec<Message>> {
        let (section_id, exclude) = (section_id.to_string(), exclude.to_string());
        let rows = self
            .blocking(move |db| db.recent_messages(&section_id, &exclude, limit))
            .await?;
        decode_all(rows, message_from_row)
    }

    async fn section_participants(&self, section_id: Uuid, limit: u32) -> Result<Vec<Uuid>> {
        let section_id = section_id.to_string();
        let ids = self
            .blocking(move |db| db.section_participants(&section_id, limit))
            .await?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    async fn section_metadata(&self, section_id: Uuid) -> Result<HashMap<String, serde_json::Value>> {
        let section_id = section_id.to_string();
        match self.blocking(move |db| db.get_section_metadata(&section_id)).await? {
            Some(raw) => parse_json(&raw),
            None => Ok(HashMap::new()),
        }
    }

    async fn relation_facts(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, RelationFacts>> {
        let mut facts: HashMap<Uuid, RelationFacts> =
            user_ids.iter().map(|id| (*id, RelationFacts::default())).collect();

        let ids: Vec<String> = user_ids.iter().map(Uuid::to_string).collect();
        let rows = self.blocking(move |db| db.violation_counts(&ids)).await?;
        for row in rows {
            let user_id = parse_id(&row.user_id)?;
            facts.insert(
                user_id,
                RelationFacts {
                    prior_violations: u32::try_from(row.removed_messages).unwrap_or(u32::MAX),
                    prior_bans: u32::try_from(row.bans).unwrap_or(u32::MAX),
                },
            );
        }
        Ok(facts)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn publish(&self, message: &Message, verdict: &Verdict, item: Option<QueueItem>) -> Result<Option<QueueItem>> {
        let row = MessageRow {
            id: message.id.to_string(),
            section_id: message.section_id.to_string(),
            author_id: message.author_id.to_string(),
            content: message.content.clone(),
            created_at: fmt_ts(message.created_at),
        };
        let action = verdict.action.as_str();
        let verdict = to_json(verdict)?;
        let item = item.as_ref().map(queue_item_to_row).transpose()?;
        let stored = self
            .blocking(move |db| db.publish_message(&row, action, &verdict, item.as_ref()))
            .await?;
        stored.map(queue_item_from_row).transpose()
    }
}

#[async_trait]
impl QueueRepository for SqliteStore {
    async fn upsert_item(&self, item: QueueItem) -> Result<QueueItem> {
        let row = queue_item_to_row(&item)?;
        let stored = self.blocking(move |db| db.upsert_queue_item(&row)).await?;
        queue_item_from_row(stored)
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_queue_item(&id)).await?;
        row.map(queue_item_from_row).transpose()
    }

    async fn open_item_for_message(&self, message_id: Uuid) -> Result<Option<QueueItem>> {
        let message_id = message_id.to_string();
        let row = self
            .blocking(move |db| db.open_queue_item_for_message(&message_id))
            .await?;
        row.map(queue_item_from_row).transpose()
    }

    async fn list_items(&self, statuses: &[QueueStatus]) -> Result<Vec<QueueItem>> {
        let labels: Vec<&'static str> = statuses.iter().map(QueueStatus::as_str).collect();
        let rows = self.blocking(move |db| db.list_queue(&labels)).await?;
        decode_all(rows, queue_item_from_row)
    }

    async fn count_open(&self) -> Result<u64> {
        self.blocking(|db| db.count_open_queue_items()).await
    }

    async fn claim(&self, id: Uuid, moderator_id: Uuid, at: DateTime<Utc>) -> Result<Transition<QueueItem>> {
        let (id, moderator_id, at) = (id.to_string(), moderator_id.to_string(), fmt_ts(at));
        let outcome = self
            .blocking(move |db| db.claim_queue_item(&id, &moderator_id, &at))
            .await?;
        Ok(match outcome {
            ClaimOutcome::Claimed(row) => Transition::Applied(queue_item_from_row(row)?),
            ClaimOutcome::AlreadyHeld(row) => Transition::Unchanged(queue_item_from_row(row)?),
            ClaimOutcome::Conflict(row) => Transition::Rejected(queue_item_from_row(row)?),
            ClaimOutcome::NotFound => Transition::NotFound,
        })
    }

    async fn resolve(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        resolution: &Resolution,
        at: DateTime<Utc>,
        ban: Option<UserBan>,
    ) -> Result<Transition<QueueItem>> {
        let id = id.to_string();
        let moderator_id = moderator_id.to_string();
        let resolved_at = fmt_ts(at);
        let encoded = to_json(resolution)?;
        let outcome = resolution.outcome.as_str();
        let ban = ban.as_ref().map(ban_to_row);

        let result = self
            .blocking(move |db| {
                let record = ResolutionRecord {
                    moderator_id: &moderator_id,
                    resolved_at: &resolved_at,
                    resolution: &encoded,
                    outcome,
                };
                db.resolve_queue_item(&id, &record, ban.as_ref())
            })
            .await?;

        Ok(match result {
            ResolveOutcome::Resolved(row) => Transition::Applied(queue_item_from_row(row)?),
            ResolveOutcome::Conflict(row) => Transition::Rejected(queue_item_from_row(row)?),
            ResolveOutcome::NotFound => Transition::NotFound,
        })
    }
}

#[async_trait]
impl AppealRepository for SqliteStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_user_by_id(&id)).await?;
        row.map(user_from_row).transpose()
    }

    async fn active_bans(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<UserBan>> {
        let (user_id, now) = (user_id.to_string(), fmt_ts(now));
        let rows = self.blocking(move |db| db.active_bans(&user_id, &now)).await?;
        decode_all(rows, ban_from_row)
    }

    async fn pending_appeal(&self, user_id: Uuid) -> Result<Option<Appeal>> {
        let user_id = user_id.to_string();
        let row = self
            .blocking(move |db| db.pending_appeal_for_user(&user_id))
            .await?;
        row.map(appeal_from_row).transpose()
    }

    async fn insert_appeal(&self, appeal: &Appeal) -> Result<bool> {
        let row = appeal_to_row(appeal);
        self.blocking(move |db| db.insert_appeal_if_none_pending(&row)).await
    }

    async fn get_appeal(&self, id: Uuid) -> Result<Option<Appeal>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_appeal(&id)).await?;
        row.map(appeal_from_row).transpose()
    }

    async fn list_appeals(&self, status: Option<AppealStatus>) -> Result<Vec<Appeal>> {
        let status = status.map(|s| s.as_str());
        let rows = self.blocking(move |db| db.list_appeals(status)).await?;
        decode_all(rows, appeal_from_row)
    }

    async fn review_appeal(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        status: AppealStatus,
        response: Option<String>,
        at: DateTime<Utc>,
        lift_bans: bool,
    ) -> Result<Transition<Appeal>> {
        let id = id.to_string();
        let moderator_id = moderator_id.to_string();
        let resolved_at = fmt_ts(at);

        let review = self
            .blocking(move |db| {
                let decision = AppealDecisionRecord {
                    moderator_id: &moderator_id,
                    status: status.as_str(),
                    response: response.as_deref(),
                    resolved_at: &resolved_at,
                    lift_bans,
                };
                db.review_appeal(&id, &decision)
            })
            .await?;

        Ok(match review {
            AppealReview::Reviewed(row) => Transition::Applied(appeal_from_row(row)?),
            AppealReview::AlreadyResolved(row) => Transition::Rejected(appeal_from_row(row)?),
            AppealReview::NotFound => Transition::NotFound,
        })
    }
}

#[async_trait]
impl StatsRepository for SqliteStore {
    async fn insert_stats(&self, stats: &ModerationStats) -> Result<bool> {
        let row = stats_to_row(stats);
        self.blocking(move |db| db.insert_stats_if_absent(&row)).await
    }

    async fn recent_stats(&self, limit: u32) -> Result<Vec<ModerationStats>> {
        let rows = self.blocking(move |db| db.recent_stats(limit)).await?;
        decode_all(rows, stats_from_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::models::{Action, Severity};

    fn store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn timestamps_keep_fixed_width() {
        let early = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let late = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        assert_eq!(fmt_ts(early).len(), fmt_ts(late).len());
        assert!(fmt_ts(early) < fmt_ts(late));
        assert_eq!(parse_ts(&fmt_ts(late)).unwrap(), late);
    }

    #[tokio::test]
    async fn corrupt_rows_are_internal_errors() {
        let store = store();
        store
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO content_safety_rules
                        (id, pattern, category, severity, action, enabled, created_by, created_at, updated_at)
                     VALUES ('not-a-uuid', 'x', 'spam', 'HIGH', 'BLOCK', 1, 'nobody', 'then', 'now')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let err = store.list_rules().await.unwrap_err();
        assert!(matches!(err, ModerationError::Internal(_)));
    }

    #[tokio::test]
    async fn queue_items_keep_their_verdict() {
        let store = store();
        let item = QueueItem {
            id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            status: QueueStatus::Queued,
            verdict: Verdict {
                action: Action::Flag,
                severity: Severity::High,
                matched_rule_ids: vec![Uuid::new_v4()],
                confidence: 1.0,
                reason: "spam".into(),
            },
            created_at: Utc::now(),
            claimed_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution: None,
        };

        let stored = store.upsert_item(item.clone()).await.unwrap();
        assert_eq!(stored.verdict, item.verdict);
        let open = store.open_item_for_message(item.message_id).await.unwrap().unwrap();
        assert_eq!(open.id, stored.id);
    }

    #[tokio::test]
    async fn constraint_failures_are_not_retryable() {
        let store = store();
        let appeal = Appeal {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            reason: "please reconsider".into(),
            status: AppealStatus::Pending,
            moderator_id: None,
            response: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        // No such user: the foreign key rejects the row on every attempt.
        let err = store.insert_appeal(&appeal).await.unwrap_err();
        assert!(matches!(err, ModerationError::Internal(_)));
        assert!(!err.is_transient());
    }
}
