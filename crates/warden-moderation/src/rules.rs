use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use warden_types::models::{Action, ContentSafetyRule, Severity};

use crate::error::{ModerationError, Result, with_timeout};
use crate::store::RuleRepository;

/// Compiled-program size cap; keeps a single admin pattern from dominating
/// per-message evaluation cost.
const REGEX_SIZE_LIMIT: usize = 256 * 1024;

/// Compile a rule pattern, reporting failures as `Validation`.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(ModerationError::Validation("pattern must not be empty".into()));
    }
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| ModerationError::Validation(format!("invalid pattern: {}", e)))
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ContentSafetyRule,
    pub regex: Regex,
}

/// Immutable snapshot of the enabled rules. Readers hold an `Arc` to one
/// snapshot for a whole evaluation; mutations publish a new snapshot.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keeps enabled rules only. Rules that no longer compile are skipped.
    pub fn compile(rules: Vec<ContentSafetyRule>) -> Self {
        let compiled = rules
            .into_iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match compile_pattern(&rule.pattern) {
                Ok(regex) => Some(CompiledRule { rule, regex }),
                Err(e) => {
                    warn!(rule_id = %rule.id, "Skipping stored rule: {}", e);
                    None
                }
            })
            .collect();
        Self { rules: compiled }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Fields an admin supplies when creating (or replacing) a rule.
#[derive(Debug, Clone)]
pub struct RuleInput {
    pub pattern: String,
    pub category: String,
    pub severity: Severity,
    pub action: Action,
    pub created_by: Uuid,
    pub metadata: Option<serde_json::Value>,
    pub enabled: bool,
}

/// Partial update applied by id.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub pattern: Option<String>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
    pub action: Option<Action>,
    pub metadata: Option<serde_json::Value>,
    pub enabled: Option<bool>,
}

/// Admin-editable rules plus the cached snapshot the pipeline reads.
pub struct RuleStore {
    repo: Arc<dyn RuleRepository>,
    cache: RwLock<Option<Arc<RuleSet>>>,
    /// Bumped on every invalidation so a reload that raced a mutation is discarded.
    generation: AtomicU64,
    timeout: Duration,
}

impl RuleStore {
    pub fn new(repo: Arc<dyn RuleRepository>, timeout: Duration) -> Self {
        Self {
            repo,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
            timeout,
        }
    }

    /// Current snapshot, loading it from the repository on a cache miss.
    pub async fn snapshot(&self) -> Result<Arc<RuleSet>> {
        if let Some(cached) = self.cache.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(cached.clone());
        }

        let seen = self.generation.load(Ordering::Acquire);
        let rules = with_timeout(self.timeout, "rule load", self.repo.list_rules()).await?;
        let set = Arc::new(RuleSet::compile(rules));

        let mut slot = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) == seen {
            *slot = Some(set.clone());
        }
        Ok(set)
    }

    /// Drop the cached snapshot; the next evaluation reloads the whole set.
    pub fn invalidate(&self) {
        let mut slot = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
    }

    /// Every stored rule, enabled or not, straight from the repository.
    pub async fn list_rules(&self) -> Result<Vec<ContentSafetyRule>> {
        with_timeout(self.timeout, "rule list", self.repo.list_rules()).await
    }

    pub async fn upsert_rule(&self, input: RuleInput) -> Result<ContentSafetyRule> {
        validate_rule(&input.pattern, &input.category, input.action)?;

        let now = Utc::now();
        let rule = ContentSafetyRule {
            id: Uuid::new_v4(),
            pattern: input.pattern,
            category: input.category.trim().to_string(),
            severity: input.severity,
            action: input.action,
            enabled: input.enabled,
            created_by: input.created_by,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        };

        let stored = with_timeout(self.timeout, "rule upsert", self.repo.upsert_rule(rule)).await?;
        self.invalidate();
        info!(rule_id = %stored.id, category = %stored.category, "Rule upserted");
        Ok(stored)
    }

    pub async fn update_rule(&self, id: Uuid, patch: RulePatch) -> Result<ContentSafetyRule> {
        let mut rule = with_timeout(self.timeout, "rule lookup", self.repo.get_rule(id))
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("rule {}", id)))?;

        if let Some(pattern) = patch.pattern {
            rule.pattern = pattern;
        }
        if let Some(category) = patch.category {
            rule.category = category.trim().to_string();
        }
        if let Some(severity) = patch.severity {
            rule.severity = severity;
        }
        if let Some(action) = patch.action {
            rule.action = action;
        }
        if patch.metadata.is_some() {
            rule.metadata = patch.metadata;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        validate_rule(&rule.pattern, &rule.category, rule.action)?;
        rule.updated_at = Utc::now();

        let stored = with_timeout(self.timeout, "rule update", self.repo.update_rule(rule)).await?;
        self.invalidate();
        info!(rule_id = %stored.id, "Rule updated");
        Ok(stored)
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let deleted = with_timeout(self.timeout, "rule delete", self.repo.delete_rule(id)).await?;
        if !deleted {
            return Err(ModerationError::NotFound(format!("rule {}", id)));
        }
        self.invalidate();
        info!(rule_id = %id, "Rule deleted");
        Ok(())
    }
}

fn validate_rule(pattern: &str, category: &str, action: Action) -> Result<()> {
    if category.trim().is_empty() {
        return Err(ModerationError::Validation("category must not be empty".into()));
    }
    if action == Action::Queue {
        return Err(ModerationError::Validation(
            "rule action must be ALLOW, FLAG or BLOCK".into(),
        ));
    }
    compile_pattern(pattern)?;
    Ok(())
}
