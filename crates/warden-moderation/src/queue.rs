use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use warden_types::events::ModerationEvent;
use warden_types::models::{Action, QueueItem, QueueStatus, Resolution, Severity, UserBan, Verdict};

use crate::error::{ModerationError, Result, with_timeout};
use crate::notify::Notifier;
use crate::pipeline::combine;
use crate::store::{MessageSource, QueueRepository, Transition};

const OPEN_STATUSES: [QueueStatus; 3] = [QueueStatus::Queued, QueueStatus::Flagged, QueueStatus::InReview];

/// Human review backlog. Items only move forward:
/// QUEUED/FLAGGED -> IN_REVIEW -> RESOLVED.
pub struct ModerationQueue {
    repo: Arc<dyn QueueRepository>,
    messages: Arc<dyn MessageSource>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl ModerationQueue {
    pub fn new(
        repo: Arc<dyn QueueRepository>,
        messages: Arc<dyn MessageSource>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            messages,
            notifier,
            timeout,
        }
    }

    /// Hold a message for review. Enqueueing a message that already has an
    /// open item replaces that item's verdict instead of adding another item.
    pub async fn enqueue(&self, message_id: Uuid, verdict: Verdict) -> Result<QueueItem> {
        let item = self.review_item(message_id, verdict)?;
        let stored = with_timeout(self.timeout, "queue upsert", self.repo.upsert_item(item)).await?;
        info!(item_id = %stored.id, message_id = %message_id, "Message queued for review");
        Ok(stored)
    }

    /// The QUEUED item a pipeline verdict produces, not yet stored.
    pub fn review_item(&self, message_id: Uuid, verdict: Verdict) -> Result<QueueItem> {
        if !verdict.action.needs_review() {
            return Err(ModerationError::Validation(format!(
                "{} verdicts are not queued",
                verdict.action.as_str()
            )));
        }
        Ok(new_item(message_id, QueueStatus::Queued, verdict))
    }

    /// A user report. Creates a FLAGGED item, or folds the report into the
    /// message's open item.
    pub async fn report(&self, message_id: Uuid, reporter_id: Uuid, reason: &str) -> Result<QueueItem> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ModerationError::Validation("report reason must not be empty".into()));
        }

        with_timeout(self.timeout, "message lookup", self.messages.get_message(message_id))
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("message {}", message_id)))?;

        let report = Verdict {
            action: Action::Flag,
            severity: Severity::Low,
            matched_rule_ids: Vec::new(),
            confidence: 0.5,
            reason: format!("user_report: {}", reason),
        };

        let existing = with_timeout(
            self.timeout,
            "queue lookup",
            self.repo.open_item_for_message(message_id),
        )
        .await?;
        let verdict = match existing {
            Some(open) => combine(&[open.verdict, report]),
            None => report,
        };

        let item = new_item(message_id, QueueStatus::Flagged, verdict);
        let stored = with_timeout(self.timeout, "queue upsert", self.repo.upsert_item(item)).await?;
        info!(item_id = %stored.id, message_id = %message_id, reporter_id = %reporter_id, "Message reported");
        Ok(stored)
    }

    /// Items in `status`, or every open item. Highest severity first, then oldest.
    pub async fn get_queue(&self, status: Option<QueueStatus>) -> Result<Vec<QueueItem>> {
        let statuses: Vec<QueueStatus> = match status {
            Some(status) => vec![status],
            None => OPEN_STATUSES.to_vec(),
        };
        with_timeout(self.timeout, "queue list", self.repo.list_items(&statuses)).await
    }

    pub async fn get_item(&self, id: Uuid) -> Result<QueueItem> {
        with_timeout(self.timeout, "queue lookup", self.repo.get_item(id))
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("queue item {}", id)))
    }

    /// Take an item for review. Exactly one of several racing moderators wins;
    /// the rest get `Conflict`. Claiming an item you already hold is a no-op.
    pub async fn claim(&self, id: Uuid, moderator_id: Uuid) -> Result<QueueItem> {
        let outcome = with_timeout(
            self.timeout,
            "queue claim",
            self.repo.claim(id, moderator_id, Utc::now()),
        )
        .await?;

        match outcome {
            Transition::Applied(item) => {
                info!(item_id = %id, moderator_id = %moderator_id, "Queue item claimed");
                Ok(item)
            }
            Transition::Unchanged(item) => Ok(item),
            Transition::Rejected(item) => Err(ModerationError::Conflict(format!(
                "queue item {} is {}",
                id,
                claim_conflict(&item)
            ))),
            Transition::NotFound => Err(ModerationError::NotFound(format!("queue item {}", id))),
        }
    }

    /// Close an item the moderator holds. `BAN_AUTHOR` bans the message's
    /// author in the same write as the RESOLVED transition.
    pub async fn resolve(&self, id: Uuid, moderator_id: Uuid, resolution: Resolution) -> Result<QueueItem> {
        if resolution.ban_duration_hours == Some(0) {
            return Err(ModerationError::Validation("banDurationHours must be positive".into()));
        }

        let item = self.get_item(id).await?;
        if item.status != QueueStatus::InReview || item.claimed_by != Some(moderator_id) {
            return Err(ModerationError::Conflict(format!(
                "queue item {} is not in review by this moderator",
                id
            )));
        }

        let now = Utc::now();
        let ban = if resolution.sanctions_author() {
            let message = with_timeout(self.timeout, "message lookup", self.messages.get_message(item.message_id))
                .await?
                .ok_or_else(|| ModerationError::NotFound(format!("message {}", item.message_id)))?;
            with_timeout(self.timeout, "author lookup", self.messages.get_author(message.author_id))
                .await?
                .ok_or_else(|| ModerationError::NotFound(format!("user {}", message.author_id)))?;

            Some(UserBan {
                id: Uuid::new_v4(),
                user_id: message.author_id,
                issued_by: moderator_id,
                reason: item.verdict.reason.clone(),
                custom_reason: resolution.note.clone(),
                thread_id: Some(message.section_id),
                is_active: true,
                expires_at: resolution
                    .ban_duration_hours
                    .map(|hours| now + chrono::Duration::hours(i64::from(hours))),
                created_at: now,
            })
        } else {
            None
        };
        let banned = ban.as_ref().map(|b| b.user_id);

        let outcome = with_timeout(
            self.timeout,
            "queue resolve",
            self.repo.resolve(id, moderator_id, &resolution, now, ban),
        )
        .await?;

        let resolved = match outcome {
            Transition::Applied(item) => item,
            Transition::Unchanged(item) | Transition::Rejected(item) => {
                warn!(item_id = %id, status = item.status.as_str(), "Resolve lost a race");
                return Err(ModerationError::Conflict(format!(
                    "queue item {} is not in review by this moderator",
                    id
                )));
            }
            Transition::NotFound => return Err(ModerationError::NotFound(format!("queue item {}", id))),
        };

        info!(
            item_id = %id,
            moderator_id = %moderator_id,
            banned_user = ?banned,
            "Queue item resolved"
        );
        self.notifier
            .notify(ModerationEvent::QueueItemResolved {
                item_id: resolved.id,
                message_id: resolved.message_id,
                moderator_id,
                outcome: resolution.outcome,
            })
            .await;

        Ok(resolved)
    }

    /// Open items (anything not RESOLVED).
    pub async fn queue_size(&self) -> Result<u64> {
        with_timeout(self.timeout, "queue count", self.repo.count_open()).await
    }
}

fn new_item(message_id: Uuid, status: QueueStatus, verdict: Verdict) -> QueueItem {
    QueueItem {
        id: Uuid::new_v4(),
        message_id,
        status,
        verdict,
        created_at: Utc::now(),
        claimed_by: None,
        resolved_at: None,
        resolved_by: None,
        resolution: None,
    }
}

fn claim_conflict(item: &QueueItem) -> &'static str {
    match item.status {
        QueueStatus::Resolved => "already resolved",
        _ => "claimed by another moderator",
    }
}
