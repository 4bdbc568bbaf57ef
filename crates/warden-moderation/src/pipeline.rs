use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

use warden_types::models::{Message, Verdict};

use crate::config::ModerationConfig;
use crate::context::EvaluationContext;
use crate::filters::{Filter, RegexFilter, RepeatOffenderFilter, VelocityFilter};
use crate::rules::RuleSet;

/// Ordered filter chain. Adding a filter never touches `combine`.
pub struct FilterPipeline {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterPipeline {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Regex rules, posting velocity and repeat-offender checks.
    pub fn standard(config: &ModerationConfig) -> Self {
        Self::new(vec![
            Box::new(RegexFilter),
            Box::new(VelocityFilter::new(
                config.velocity_window_secs,
                config.velocity_max_messages,
                config.max_duplicate_messages,
            )),
            Box::new(RepeatOffenderFilter::new(config.repeat_offender_threshold)),
        ])
    }

    /// Run every filter and fold the votes. A filter that errors or panics
    /// abstains; if every filter fails the message is held for review.
    pub fn evaluate(&self, message: &Message, ctx: &EvaluationContext, rules: &RuleSet) -> Verdict {
        let mut votes = Vec::new();
        let mut failures = 0usize;

        for filter in &self.filters {
            let outcome = catch_unwind(AssertUnwindSafe(|| filter.evaluate(message, ctx, rules)));
            match outcome {
                Ok(Ok(Some(verdict))) => {
                    debug!(
                        filter = filter.name(),
                        message_id = %message.id,
                        action = verdict.action.as_str(),
                        "Filter voted"
                    );
                    votes.push(verdict);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(filter = filter.name(), message_id = %message.id, "Filter failed: {:#}", e);
                }
                Err(_) => {
                    failures += 1;
                    warn!(filter = filter.name(), message_id = %message.id, "Filter panicked");
                }
            }
        }

        if !self.filters.is_empty() && failures == self.filters.len() {
            warn!(message_id = %message.id, "Every filter failed, holding message for review");
            return Verdict::fail_closed("pipeline_unavailable");
        }

        combine(&votes)
    }
}

/// Fold filter votes into one verdict. The result does not depend on vote order:
/// highest severity wins, then action precedence, then the smallest reason.
pub fn combine(votes: &[Verdict]) -> Verdict {
    let Some(winner) = votes.iter().max_by(|a, b| {
        (a.severity, a.action.precedence())
            .cmp(&(b.severity, b.action.precedence()))
            .then_with(|| b.reason.cmp(&a.reason))
    }) else {
        return Verdict::allow();
    };

    let mut matched_rule_ids: Vec<_> = votes.iter().flat_map(|v| v.matched_rule_ids.iter().copied()).collect();
    matched_rule_ids.sort();
    matched_rule_ids.dedup();

    let confidence = votes
        .iter()
        .filter(|v| v.action == winner.action)
        .map(|v| v.confidence)
        .fold(0.0f32, f32::max);

    Verdict {
        action: winner.action,
        severity: winner.severity,
        matched_rule_ids,
        confidence,
        reason: winner.reason.clone(),
    }
}
