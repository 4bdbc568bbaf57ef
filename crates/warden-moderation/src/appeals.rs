use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use warden_types::events::ModerationEvent;
use warden_types::models::{Appeal, AppealDecision, AppealStatus, User};

use crate::error::{ModerationError, Result, with_timeout};
use crate::notify::Notifier;
use crate::store::{AppealRepository, Transition};

/// Sanctioned users contest a ban; a moderator decides once.
///
/// Approval lifts every active ban the user holds, not just the one tied to
/// the appealed message. Users are assumed to carry a single active ban.
pub struct AppealsWorkflow {
    repo: Arc<dyn AppealRepository>,
    notifier: Arc<dyn Notifier>,
    min_reason_len: usize,
    timeout: Duration,
}

impl AppealsWorkflow {
    pub fn new(repo: Arc<dyn AppealRepository>, notifier: Arc<dyn Notifier>, min_reason_len: usize, timeout: Duration) -> Self {
        Self {
            repo,
            notifier,
            min_reason_len,
            timeout,
        }
    }

    pub async fn user(&self, id: Uuid) -> Result<User> {
        with_timeout(self.timeout, "user lookup", self.repo.get_user(id))
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("user {}", id)))
    }

    /// Checks run in a fixed order so callers always see the first failing rule:
    /// sanctioned, has an active ban, no pending appeal, reason long enough.
    pub async fn submit_appeal(&self, user_id: Uuid, message_id: Uuid, reason: &str) -> Result<Appeal> {
        let user = self.user(user_id).await?;
        if !user.status.is_sanctioned() {
            return Err(ModerationError::NotEligible);
        }

        let now = Utc::now();
        let bans = with_timeout(self.timeout, "ban lookup", self.repo.active_bans(user_id, now)).await?;
        if bans.is_empty() {
            return Err(ModerationError::NoActiveBan);
        }

        let pending = with_timeout(self.timeout, "appeal lookup", self.repo.pending_appeal(user_id)).await?;
        if pending.is_some() {
            return Err(ModerationError::DuplicateAppeal);
        }

        let reason = reason.trim();
        if reason.chars().count() < self.min_reason_len {
            return Err(ModerationError::Validation(format!(
                "reason must be at least {} characters",
                self.min_reason_len
            )));
        }

        let appeal = Appeal {
            id: Uuid::new_v4(),
            user_id,
            message_id,
            reason: reason.to_string(),
            status: AppealStatus::Pending,
            moderator_id: None,
            response: None,
            created_at: now,
            resolved_at: None,
        };

        let inserted = with_timeout(self.timeout, "appeal insert", self.repo.insert_appeal(&appeal)).await?;
        if !inserted {
            return Err(ModerationError::DuplicateAppeal);
        }

        info!(appeal_id = %appeal.id, user_id = %user_id, message_id = %message_id, "Appeal submitted");
        Ok(appeal)
    }

    /// PENDING -> APPROVED/DENIED, exactly once. Approval deactivates the
    /// user's active bans and restores them to ACTIVE atomically with the
    /// appeal update; on failure nothing changes and the whole call may be retried.
    pub async fn review_appeal(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        decision: AppealDecision,
        response: Option<String>,
    ) -> Result<Appeal> {
        let (status, lift_bans) = match decision {
            AppealDecision::Approve => (AppealStatus::Approved, true),
            AppealDecision::Deny => (AppealStatus::Denied, false),
        };
        let response = response.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

        let outcome = with_timeout(
            self.timeout,
            "appeal review",
            self.repo.review_appeal(id, moderator_id, status, response, Utc::now(), lift_bans),
        )
        .await?;

        let appeal = match outcome {
            Transition::Applied(appeal) => appeal,
            Transition::Unchanged(appeal) | Transition::Rejected(appeal) => {
                warn!(appeal_id = %id, status = appeal.status.as_str(), "Appeal already reviewed");
                return Err(ModerationError::Conflict(format!(
                    "appeal {} is already {}",
                    id,
                    appeal.status.as_str()
                )));
            }
            Transition::NotFound => return Err(ModerationError::NotFound(format!("appeal {}", id))),
        };

        info!(
            appeal_id = %id,
            moderator_id = %moderator_id,
            status = appeal.status.as_str(),
            "Appeal reviewed"
        );
        self.notifier
            .notify(ModerationEvent::AppealResolved {
                appeal_id: appeal.id,
                user_id: appeal.user_id,
                moderator_id,
                status: appeal.status,
            })
            .await;

        Ok(appeal)
    }

    pub async fn get_appeal(&self, id: Uuid) -> Result<Appeal> {
        with_timeout(self.timeout, "appeal lookup", self.repo.get_appeal(id))
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("appeal {}", id)))
    }

    /// Newest first.
    pub async fn list_appeals(&self, status: Option<AppealStatus>) -> Result<Vec<Appeal>> {
        with_timeout(self.timeout, "appeal list", self.repo.list_appeals(status)).await
    }
}
