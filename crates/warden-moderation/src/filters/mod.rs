//! Filters vote on a single message. Each returns `Ok(None)` to abstain; the
//! pipeline folds the votes into one verdict.

mod offender;
mod regex;
mod scoring;
mod velocity;

pub use self::offender::RepeatOffenderFilter;
pub use self::regex::RegexFilter;
pub use self::scoring::{ScoreModel, ScoringFilter};
pub use self::velocity::VelocityFilter;

use warden_types::models::{Message, Verdict};

use crate::context::EvaluationContext;
use crate::rules::RuleSet;

pub trait Filter: Send + Sync {
    /// Used in logs when the filter misbehaves.
    fn name(&self) -> &'static str;

    fn evaluate(&self, message: &Message, ctx: &EvaluationContext, rules: &RuleSet) -> anyhow::Result<Option<Verdict>>;
}

/// Lowercased, trimmed, inner whitespace collapsed. Used to spot reposts.
pub(crate) fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
