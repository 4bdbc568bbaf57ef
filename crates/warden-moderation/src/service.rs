use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use warden_types::models::{Action, Message, QueueItem, Verdict};

use crate::context::ContextProvider;
use crate::error::{Result, with_timeout};
use crate::pipeline::FilterPipeline;
use crate::queue::ModerationQueue;
use crate::rules::RuleStore;
use crate::stats::StatsAggregator;
use crate::store::MessageStore;

/// What happened to one inbound message.
#[derive(Debug, Clone)]
pub struct ModerationOutcome {
    pub verdict: Verdict,
    /// False only for BLOCK.
    pub published: bool,
    /// Set for FLAG and QUEUE verdicts.
    pub queue_item: Option<QueueItem>,
}

/// Runs inbound messages through context building, the filter chain, stats,
/// persistence and the review queue.
pub struct ModerationService {
    rules: Arc<RuleStore>,
    context: Arc<dyn ContextProvider>,
    pipeline: Arc<FilterPipeline>,
    queue: Arc<ModerationQueue>,
    stats: Arc<StatsAggregator>,
    messages: Arc<dyn MessageStore>,
    context_timeout: Duration,
    store_timeout: Duration,
}

impl ModerationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<RuleStore>,
        context: Arc<dyn ContextProvider>,
        pipeline: Arc<FilterPipeline>,
        queue: Arc<ModerationQueue>,
        stats: Arc<StatsAggregator>,
        messages: Arc<dyn MessageStore>,
        context_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            rules,
            context,
            pipeline,
            queue,
            stats,
            messages,
            context_timeout,
            store_timeout,
        }
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn queue(&self) -> &Arc<ModerationQueue> {
        &self.queue
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Verdict for `message`. Never fails: when rules or context cannot be
    /// loaded in time the message is held for review instead.
    pub async fn evaluate(&self, message: &Message) -> Verdict {
        let rules = match self.rules.snapshot().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(message_id = %message.id, "Rules unavailable, holding message: {}", e);
                return Verdict::fail_closed("rules_unavailable");
            }
        };

        let ctx = match with_timeout(self.context_timeout, "context build", self.context.build_context(message)).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(message_id = %message.id, "Context unavailable, holding message: {}", e);
                return Verdict::fail_closed("context_unavailable");
            }
        };

        self.pipeline.evaluate(message, &ctx, &rules)
    }

    /// Evaluate, count, and act on a new message. Blocked messages are never
    /// stored. A held message and its queue item are written together, so
    /// neither exists without the other.
    pub async fn moderate(&self, message: Message) -> Result<ModerationOutcome> {
        let verdict = self.evaluate(&message).await;
        self.stats.record_verdict(&verdict, Utc::now());

        if verdict.action == Action::Block {
            info!(
                message_id = %message.id,
                author_id = %message.author_id,
                reason = %verdict.reason,
                "Message blocked"
            );
            return Ok(ModerationOutcome {
                verdict,
                published: false,
                queue_item: None,
            });
        }

        let item = if verdict.action.needs_review() {
            Some(self.queue.review_item(message.id, verdict.clone())?)
        } else {
            None
        };

        let queue_item = with_timeout(
            self.store_timeout,
            "message publish",
            self.messages.publish(&message, &verdict, item),
        )
        .await?;

        if let Some(item) = &queue_item {
            info!(item_id = %item.id, message_id = %message.id, "Message queued for review");
        }
        debug!(message_id = %message.id, action = verdict.action.as_str(), "Message published");
        Ok(ModerationOutcome {
            verdict,
            published: true,
            queue_item,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use crate::error::ModerationError;
    use crate::notify::NoopNotifier;
    use crate::sqlite::SqliteStore;
    use async_trait::async_trait;
    use uuid::Uuid;
    use warden_db::Database;

    struct DownProvider;

    #[async_trait]
    impl ContextProvider for DownProvider {
        async fn build_context(&self, _: &Message) -> Result<EvaluationContext> {
            Err(ModerationError::Transient("section store offline".into()))
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl ContextProvider for HangingProvider {
        async fn build_context(&self, _: &Message) -> Result<EvaluationContext> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(EvaluationContext::default())
        }
    }

    struct FullDisk;

    #[async_trait]
    impl MessageStore for FullDisk {
        async fn publish(&self, _: &Message, _: &Verdict, _: Option<QueueItem>) -> Result<Option<QueueItem>> {
            Err(ModerationError::Transient("disk full".into()))
        }
    }

    fn service(context: Arc<dyn ContextProvider>) -> (ModerationService, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(SqliteStore::new(db.clone()));
        (build(context, store.clone(), store), db)
    }

    fn build(
        context: Arc<dyn ContextProvider>,
        store: Arc<SqliteStore>,
        messages: Arc<dyn MessageStore>,
    ) -> ModerationService {
        let timeout = Duration::from_secs(5);
        ModerationService::new(
            Arc::new(RuleStore::new(store.clone(), timeout)),
            context,
            Arc::new(FilterPipeline::standard(&Default::default())),
            Arc::new(ModerationQueue::new(store.clone(), store.clone(), Arc::new(NoopNotifier), timeout)),
            Arc::new(StatsAggregator::new(store.clone(), 3600, timeout)),
            messages,
            Duration::from_millis(50),
            timeout,
        )
    }

    fn message() -> Message {
        Message {
            id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            content: "hello world".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn context_failure_fails_closed() {
        let (service, db) = service(Arc::new(DownProvider));
        let outcome = service.moderate(message()).await.unwrap();

        assert_eq!(outcome.verdict.action, Action::Queue);
        assert_eq!(outcome.verdict.reason, "context_unavailable");
        // Held, not rejected: the post goes through and waits for review.
        assert!(outcome.published);
        assert!(outcome.queue_item.is_some());
        assert_eq!(db.count_open_queue_items().unwrap(), 1);
    }

    #[tokio::test]
    async fn context_timeout_fails_closed() {
        let (service, _db) = service(Arc::new(HangingProvider));
        let verdict = service.evaluate(&message()).await;
        assert_eq!(verdict.action, Action::Queue);
        assert_eq!(verdict.reason, "context_unavailable");
    }

    #[tokio::test]
    async fn verdicts_are_counted() {
        let (service, _db) = service(Arc::new(DownProvider));
        service.moderate(message()).await.unwrap();

        let window = service.stats().window_start(Utc::now());
        assert_eq!(service.stats().open_counts(window).queue, 1);
    }

    #[tokio::test]
    async fn failed_publish_leaves_nothing_to_review() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(SqliteStore::new(db.clone()));
        let service = build(Arc::new(DownProvider), store, Arc::new(FullDisk));

        let msg = message();
        let err = service.moderate(msg.clone()).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(db.count_open_queue_items().unwrap(), 0);
        assert!(db.get_message(&msg.id.to_string()).unwrap().is_none());
    }

    #[tokio::test]
    async fn held_message_is_stored_with_its_item() {
        let (service, db) = service(Arc::new(DownProvider));
        let msg = message();
        let outcome = service.moderate(msg.clone()).await.unwrap();

        let item = outcome.queue_item.unwrap();
        assert_eq!(item.message_id, msg.id);
        assert!(db.get_queue_item(&item.id.to_string()).unwrap().is_some());
        assert!(db.get_message(&msg.id.to_string()).unwrap().is_some());
    }
}
