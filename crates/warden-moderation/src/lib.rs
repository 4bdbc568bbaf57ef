//! Message moderation: rules, filters, the review queue, appeals and stats.

pub mod appeals;
pub mod config;
pub mod context;
pub mod error;
pub mod filters;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod rules;
pub mod service;
pub mod sqlite;
pub mod stats;
pub mod store;

use std::sync::Arc;

use warden_db::Database;

pub use appeals::AppealsWorkflow;
pub use config::ModerationConfig;
pub use context::{ContextProvider, EvaluationContext, StoreContextProvider};
pub use error::{ModerationError, Result};
pub use notify::Notifier;
pub use pipeline::FilterPipeline;
pub use queue::ModerationQueue;
pub use rules::RuleStore;
pub use service::{ModerationOutcome, ModerationService};
pub use stats::StatsAggregator;

/// Everything the HTTP layer needs, wired over one store.
#[derive(Clone)]
pub struct Moderation {
    pub service: Arc<ModerationService>,
    pub appeals: Arc<AppealsWorkflow>,
}

impl Moderation {
    /// Wire the standard pipeline over SQLite.
    pub fn with_sqlite(db: Arc<Database>, config: &ModerationConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_pipeline(db, config, notifier, FilterPipeline::standard(config))
    }

    pub fn with_pipeline(
        db: Arc<Database>,
        config: &ModerationConfig,
        notifier: Arc<dyn Notifier>,
        pipeline: FilterPipeline,
    ) -> Self {
        let store = Arc::new(sqlite::SqliteStore::new(db));

        let rules = Arc::new(RuleStore::new(store.clone(), config.store_timeout));
        let context = Arc::new(StoreContextProvider::new(
            store.clone(),
            config.history_cap,
            config.participant_cap,
            config.context_timeout,
        ));
        let queue = Arc::new(ModerationQueue::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            config.store_timeout,
        ));
        let stats = Arc::new(StatsAggregator::new(
            store.clone(),
            config.stats_window_secs,
            config.store_timeout,
        ));
        let appeals = Arc::new(AppealsWorkflow::new(
            store.clone(),
            notifier,
            config.appeal_min_reason_len,
            config.store_timeout,
        ));

        let service = Arc::new(ModerationService::new(
            rules,
            context,
            Arc::new(pipeline),
            queue,
            stats,
            store,
            config.context_timeout,
            config.store_timeout,
        ));

        Self { service, appeals }
    }
}
