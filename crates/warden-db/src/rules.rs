use crate::models::RuleRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::{Connection, Row};

const RULE_COLUMNS: &str =
    "id, pattern, category, severity, action, enabled, created_by, metadata, created_at, updated_at";

/// Result of updating a rule by id.
#[derive(Debug)]
pub enum RuleUpdate {
    Updated(RuleRow),
    NotFound,
    /// Another rule already owns the requested `(pattern, category)` pair.
    Collision { existing_id: String },
}

impl Database {
    pub fn list_rules(&self) -> Result<Vec<RuleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM content_safety_rules ORDER BY created_at ASC",
                RULE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], rule_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_rule(&self, id: &str) -> Result<Option<RuleRow>> {
        self.with_conn(|conn| query_rule(conn, id))
    }

    /// Insert or replace by `(pattern, category)`. An existing rule keeps its id
    /// and `created_at`; everything else is overwritten.
    pub fn upsert_rule(&self, rule: &RuleRow) -> Result<RuleRow> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO content_safety_rules
                    (id, pattern, category, severity, action, enabled, created_by, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(pattern, category) DO UPDATE SET
                    severity = excluded.severity,
                    action = excluded.action,
                    enabled = excluded.enabled,
                    created_by = excluded.created_by,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    rule.id,
                    rule.pattern,
                    rule.category,
                    rule.severity,
                    rule.action,
                    rule.enabled,
                    rule.created_by,
                    rule.metadata,
                    rule.created_at,
                    rule.updated_at,
                ],
            )?;

            let stored = tx.query_row(
                &format!(
                    "SELECT {} FROM content_safety_rules WHERE pattern = ?1 AND category = ?2",
                    RULE_COLUMNS
                ),
                [&rule.pattern, &rule.category],
                rule_from_row,
            )?;
            Ok(stored)
        })
    }

    /// Overwrite the rule with `rule.id`, keeping its `created_at`.
    pub fn update_rule(&self, rule: &RuleRow) -> Result<RuleUpdate> {
        self.with_tx(|tx| {
            if query_rule(tx, &rule.id)?.is_none() {
                return Ok(RuleUpdate::NotFound);
            }

            let clash: Option<String> = tx
                .query_row(
                    "SELECT id FROM content_safety_rules WHERE pattern = ?1 AND category = ?2 AND id != ?3",
                    [&rule.pattern, &rule.category, &rule.id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing_id) = clash {
                return Ok(RuleUpdate::Collision { existing_id });
            }

            tx.execute(
                "UPDATE content_safety_rules SET
                    pattern = ?2, category = ?3, severity = ?4, action = ?5,
                    enabled = ?6, metadata = ?7, updated_at = ?8
                 WHERE id = ?1",
                rusqlite::params![
                    rule.id,
                    rule.pattern,
                    rule.category,
                    rule.severity,
                    rule.action,
                    rule.enabled,
                    rule.metadata,
                    rule.updated_at,
                ],
            )?;

            let stored = query_rule(tx, &rule.id)?
                .ok_or_else(|| anyhow::anyhow!("rule {} vanished during update", rule.id))?;
            Ok(RuleUpdate::Updated(stored))
        })
    }

    /// Returns false when no rule had that id.
    pub fn delete_rule(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM content_safety_rules WHERE id = ?1", [id])?;
            Ok(deleted == 1)
        })
    }
}

fn query_rule(conn: &Connection, id: &str) -> Result<Option<RuleRow>> {
    conn.query_row(
        &format!("SELECT {} FROM content_safety_rules WHERE id = ?1", RULE_COLUMNS),
        [id],
        rule_from_row,
    )
    .optional()
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<RuleRow> {
    Ok(RuleRow {
        id: row.get(0)?,
        pattern: row.get(1)?,
        category: row.get(2)?,
        severity: row.get(3)?,
        action: row.get(4)?,
        enabled: row.get(5)?,
        created_by: row.get(6)?,
        metadata: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
