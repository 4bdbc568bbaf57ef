use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AppealStatus, ResolutionOutcome};

/// Events handed to the notification sender after a moderator acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ModerationEvent {
    /// A queue item reached RESOLVED
    QueueItemResolved {
        item_id: Uuid,
        message_id: Uuid,
        moderator_id: Uuid,
        outcome: ResolutionOutcome,
    },

    /// An appeal left PENDING
    AppealResolved {
        appeal_id: Uuid,
        user_id: Uuid,
        moderator_id: Uuid,
        status: AppealStatus,
    },
}

impl ModerationEvent {
    /// The user who should hear about this event, if it targets one.
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            Self::AppealResolved { user_id, .. } => Some(*user_id),
            Self::QueueItemResolved { .. } => None,
        }
    }
}
