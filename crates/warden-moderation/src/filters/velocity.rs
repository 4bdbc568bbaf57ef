use chrono::Duration;

use warden_types::models::{Action, Message, Severity, Verdict};

use super::{Filter, normalize};
use crate::context::EvaluationContext;
use crate::rules::RuleSet;

/// Holds authors for review when they post too fast or repeat themselves.
/// Works only from the section history in the context, so it sees at most
/// the capped recent window.
#[derive(Debug, Clone)]
pub struct VelocityFilter {
    pub window: Duration,
    pub max_messages: usize,
    pub max_duplicates: usize,
}

impl VelocityFilter {
    pub fn new(window_secs: i64, max_messages: usize, max_duplicates: usize) -> Self {
        Self {
            window: Duration::seconds(window_secs),
            max_messages,
            max_duplicates,
        }
    }

    fn hold(reason: &str, confidence: f32) -> Verdict {
        Verdict {
            action: Action::Queue,
            severity: Severity::Medium,
            matched_rule_ids: Vec::new(),
            confidence,
            reason: reason.to_string(),
        }
    }
}

impl Filter for VelocityFilter {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn evaluate(&self, message: &Message, ctx: &EvaluationContext, _rules: &RuleSet) -> anyhow::Result<Option<Verdict>> {
        let since = message.created_at - self.window;
        let recent: Vec<&Message> = ctx
            .recent_history
            .iter()
            .filter(|m| m.author_id == message.author_id && m.id != message.id && m.created_at >= since)
            .collect();

        if self.max_messages > 0 && recent.len() >= self.max_messages {
            return Ok(Some(Self::hold("velocity", 0.8)));
        }

        let content = normalize(&message.content);
        let duplicates = recent.iter().filter(|m| normalize(&m.content) == content).count();
        if self.max_duplicates > 0 && duplicates >= self.max_duplicates {
            return Ok(Some(Self::hold("duplicate_content", 0.9)));
        }

        Ok(None)
    }
}
