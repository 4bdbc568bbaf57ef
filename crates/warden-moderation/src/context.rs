use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use warden_types::models::Message;

use crate::error::{ModerationError, Result, with_timeout};
use crate::store::MessageSource;

/// What the platform knows about a user's history with moderation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationFacts {
    /// Messages of theirs that moderators removed or that led to a ban.
    pub prior_violations: u32,
    pub prior_bans: u32,
}

/// Everything filters may look at besides the message itself. Built fresh for
/// each evaluation and never persisted.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub section_id: Uuid,
    pub participant_ids: HashSet<Uuid>,
    /// Most recent first, capped.
    pub recent_history: Vec<Message>,
    pub section_metadata: HashMap<String, serde_json::Value>,
    pub relationships: HashMap<Uuid, RelationFacts>,
}

impl EvaluationContext {
    pub fn facts_for(&self, user_id: Uuid) -> RelationFacts {
        self.relationships.get(&user_id).copied().unwrap_or_default()
    }
}

#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Read-only. Store failures surface as `Transient`.
    async fn build_context(&self, message: &Message) -> Result<EvaluationContext>;
}

/// Builds contexts from the message store, bounding every read.
pub struct StoreContextProvider {
    source: Arc<dyn MessageSource>,
    history_cap: u32,
    participant_cap: u32,
    timeout: Duration,
}

impl StoreContextProvider {
    pub fn new(source: Arc<dyn MessageSource>, history_cap: u32, participant_cap: u32, timeout: Duration) -> Self {
        Self {
            source,
            history_cap,
            participant_cap,
            timeout,
        }
    }
}

#[async_trait]
impl ContextProvider for StoreContextProvider {
    async fn build_context(&self, message: &Message) -> Result<EvaluationContext> {
        let reads = async {
            let mut recent_history = self
                .source
                .recent_messages(message.section_id, message.id, self.history_cap)
                .await?;
            recent_history.truncate(self.history_cap as usize);

            let mut participants = self
                .source
                .section_participants(message.section_id, self.participant_cap)
                .await?;
            participants.truncate(self.participant_cap as usize);
            let participant_ids: HashSet<Uuid> = participants.into_iter().collect();

            let section_metadata = self.source.section_metadata(message.section_id).await?;

            // Facts for the author plus everyone who spoke recently.
            let mut subjects: Vec<Uuid> = recent_history.iter().map(|m| m.author_id).collect();
            subjects.push(message.author_id);
            subjects.sort();
            subjects.dedup();
            let relationships = self.source.relation_facts(&subjects).await?;

            Ok(EvaluationContext {
                section_id: message.section_id,
                participant_ids,
                recent_history,
                section_metadata,
                relationships,
            })
        };

        with_timeout(self.timeout, "context build", reads)
            .await
            .map_err(|e| match e {
                ModerationError::Transient(_) => e,
                other => ModerationError::Transient(other.to_string()),
            })
    }
}
