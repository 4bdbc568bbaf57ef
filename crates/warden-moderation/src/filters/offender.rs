use warden_types::models::{Action, Message, Severity, Verdict};

use super::Filter;
use crate::context::EvaluationContext;
use crate::rules::RuleSet;

/// Flags everything from authors with a record of removed content or bans.
#[derive(Debug, Clone)]
pub struct RepeatOffenderFilter {
    pub threshold: u32,
}

impl RepeatOffenderFilter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl Filter for RepeatOffenderFilter {
    fn name(&self) -> &'static str {
        "repeat_offender"
    }

    fn evaluate(&self, message: &Message, ctx: &EvaluationContext, _rules: &RuleSet) -> anyhow::Result<Option<Verdict>> {
        if self.threshold == 0 {
            return Ok(None);
        }

        let facts = ctx.facts_for(message.author_id);
        if facts.prior_violations < self.threshold {
            return Ok(None);
        }

        Ok(Some(Verdict {
            action: Action::Flag,
            severity: Severity::Low,
            matched_rule_ids: Vec::new(),
            confidence: 0.5,
            reason: "repeat_offender".into(),
        }))
    }
}
