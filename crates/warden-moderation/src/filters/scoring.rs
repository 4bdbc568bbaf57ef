use anyhow::ensure;

use warden_types::models::{Action, Message, Severity, Verdict};

use super::Filter;
use crate::context::EvaluationContext;
use crate::rules::RuleSet;

/// A probabilistic classifier. Returns the probability in `[0, 1]` that the
/// message is abusive.
pub trait ScoreModel: Send + Sync {
    fn score(&self, message: &Message, ctx: &EvaluationContext) -> anyhow::Result<f32>;
}

/// Turns a model score into a vote using two thresholds.
pub struct ScoringFilter<M: ScoreModel> {
    model: M,
    flag_threshold: f32,
    block_threshold: f32,
}

impl<M: ScoreModel> ScoringFilter<M> {
    pub fn new(model: M, flag_threshold: f32, block_threshold: f32) -> Self {
        Self {
            model,
            flag_threshold,
            block_threshold,
        }
    }
}

impl<M: ScoreModel> Filter for ScoringFilter<M> {
    fn name(&self) -> &'static str {
        "scoring"
    }

    fn evaluate(&self, message: &Message, ctx: &EvaluationContext, _rules: &RuleSet) -> anyhow::Result<Option<Verdict>> {
        let score = self.model.score(message, ctx)?;
        ensure!((0.0..=1.0).contains(&score), "model score {} out of range", score);

        let (action, severity) = if score >= self.block_threshold {
            (Action::Block, Severity::High)
        } else if score >= self.flag_threshold {
            (Action::Flag, Severity::Medium)
        } else {
            return Ok(None);
        };

        Ok(Some(Verdict {
            action,
            severity,
            matched_rule_ids: Vec::new(),
            confidence: score,
            reason: "model_score".into(),
        }))
    }
}
