use warden_types::models::{Message, Verdict};

use super::Filter;
use crate::context::EvaluationContext;
use crate::rules::RuleSet;

/// Matches content against every enabled rule. The strongest matching rule
/// decides the vote; every matching rule id is reported.
#[derive(Debug, Default)]
pub struct RegexFilter;

impl Filter for RegexFilter {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn evaluate(&self, message: &Message, _ctx: &EvaluationContext, rules: &RuleSet) -> anyhow::Result<Option<Verdict>> {
        let mut verdict: Option<Verdict> = None;

        for compiled in rules.iter().filter(|c| c.regex.is_match(&message.content)) {
            let rule = &compiled.rule;
            match verdict.as_mut() {
                None => {
                    verdict = Some(Verdict {
                        action: rule.action,
                        severity: rule.severity,
                        matched_rule_ids: vec![rule.id],
                        confidence: 1.0,
                        reason: rule.category.clone(),
                    })
                }
                Some(current) => {
                    current.matched_rule_ids.push(rule.id);
                    let stronger = (rule.severity, rule.action.precedence())
                        > (current.severity, current.action.precedence());
                    if stronger {
                        current.action = rule.action;
                        current.severity = rule.severity;
                        current.reason = rule.category.clone();
                    }
                }
            }
        }

        Ok(verdict)
    }
}
