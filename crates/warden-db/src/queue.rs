use crate::models::{BanRow, QueueItemRow};
use crate::{Database, OptionalExt, placeholders};
use anyhow::{Result, bail};
use rusqlite::{Connection, Row};

const QUEUE_COLUMNS: &str = "id, message_id, status, severity_rank, verdict, created_at, \
     claimed_by, claimed_at, resolved_at, resolved_by, resolution, outcome";

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(QueueItemRow),
    /// The same moderator already holds the item.
    AlreadyHeld(QueueItemRow),
    /// Someone else holds it, or it is already resolved.
    Conflict(QueueItemRow),
    NotFound,
}

/// Result of a resolve attempt.
#[derive(Debug)]
pub enum ResolveOutcome {
    Resolved(QueueItemRow),
    /// Not IN_REVIEW under this moderator.
    Conflict(QueueItemRow),
    NotFound,
}

/// Columns written when a queue item is resolved.
pub struct ResolutionRecord<'a> {
    pub moderator_id: &'a str,
    pub resolved_at: &'a str,
    pub resolution: &'a str,
    pub outcome: &'a str,
}

impl Database {
    /// Insert a new open item, or refresh the verdict of the open item that
    /// already exists for `item.message_id`. The existing item keeps its id,
    /// status and `created_at`.
    pub fn upsert_queue_item(&self, item: &QueueItemRow) -> Result<QueueItemRow> {
        self.with_tx(|tx| upsert_open_item(tx, item))
    }

    pub fn get_queue_item(&self, id: &str) -> Result<Option<QueueItemRow>> {
        self.with_conn(|conn| query_queue_item(conn, id))
    }

    pub fn open_queue_item_for_message(&self, message_id: &str) -> Result<Option<QueueItemRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM queue_items WHERE message_id = ?1 AND status != 'RESOLVED'",
                    QUEUE_COLUMNS
                ),
                [message_id],
                queue_item_from_row,
            )
            .optional()
        })
    }

    /// Items in any of `statuses`, highest severity first, oldest first within a severity.
    pub fn list_queue(&self, statuses: &[&str]) -> Result<Vec<QueueItemRow>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM queue_items WHERE status IN ({}) ORDER BY severity_rank DESC, created_at ASC",
                QUEUE_COLUMNS,
                placeholders(statuses.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = statuses
                .iter()
                .map(|s| s as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), queue_item_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_open_queue_items(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE status != 'RESOLVED'",
                [],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    /// Compare-and-set QUEUED/FLAGGED -> IN_REVIEW. The status guard in the
    /// UPDATE is what makes concurrent claims exclusive.
    pub fn claim_queue_item(&self, id: &str, moderator_id: &str, claimed_at: &str) -> Result<ClaimOutcome> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE queue_items SET status = 'IN_REVIEW', claimed_by = ?2, claimed_at = ?3
                 WHERE id = ?1 AND status IN ('QUEUED', 'FLAGGED')",
                [id, moderator_id, claimed_at],
            )?;

            let current = match query_queue_item(tx, id)? {
                Some(row) => row,
                None => return Ok(ClaimOutcome::NotFound),
            };

            if changed == 1 {
                Ok(ClaimOutcome::Claimed(current))
            } else if current.status == "IN_REVIEW" && current.claimed_by.as_deref() == Some(moderator_id) {
                Ok(ClaimOutcome::AlreadyHeld(current))
            } else {
                Ok(ClaimOutcome::Conflict(current))
            }
        })
    }

    /// IN_REVIEW -> RESOLVED for the claiming moderator. When `ban` is given the
    /// ban row and the author's BANNED status are written in the same transaction.
    pub fn resolve_queue_item(
        &self,
        id: &str,
        record: &ResolutionRecord<'_>,
        ban: Option<&BanRow>,
    ) -> Result<ResolveOutcome> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE queue_items SET status = 'RESOLVED', resolved_at = ?3, resolved_by = ?2,
                    resolution = ?4, outcome = ?5
                 WHERE id = ?1 AND status = 'IN_REVIEW' AND claimed_by = ?2",
                [id, record.moderator_id, record.resolved_at, record.resolution, record.outcome],
            )?;

            let current = match query_queue_item(tx, id)? {
                Some(row) => row,
                None => return Ok(ResolveOutcome::NotFound),
            };
            if changed == 0 {
                return Ok(ResolveOutcome::Conflict(current));
            }

            if let Some(ban) = ban {
                insert_ban(tx, ban)?;
                let updated = tx.execute(
                    "UPDATE users SET status = 'BANNED' WHERE id = ?1",
                    [&ban.user_id],
                )?;
                if updated != 1 {
                    bail!("cannot ban unknown user {}", ban.user_id);
                }
            }

            Ok(ResolveOutcome::Resolved(current))
        })
    }
}

pub(crate) fn insert_ban(conn: &Connection, ban: &BanRow) -> Result<()> {
    conn.execute(
        "INSERT INTO user_bans
            (id, user_id, issued_by, reason, custom_reason, thread_id, is_active, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            ban.id,
            ban.user_id,
            ban.issued_by,
            ban.reason,
            ban.custom_reason,
            ban.thread_id,
            ban.is_active,
            ban.expires_at,
            ban.created_at,
        ],
    )?;
    Ok(())
}

/// Shared by `upsert_queue_item` and `publish_message` so both run inside
/// the caller's transaction.
pub(crate) fn upsert_open_item(conn: &Connection, item: &QueueItemRow) -> Result<QueueItemRow> {
    let open = conn
        .query_row(
            &format!(
                "SELECT {} FROM queue_items WHERE message_id = ?1 AND status != 'RESOLVED'",
                QUEUE_COLUMNS
            ),
            [&item.message_id],
            queue_item_from_row,
        )
        .optional()?;

    let id = match open {
        Some(existing) => {
            conn.execute(
                "UPDATE queue_items SET verdict = ?2, severity_rank = ?3 WHERE id = ?1",
                rusqlite::params![existing.id, item.verdict, item.severity_rank],
            )?;
            existing.id
        }
        None => {
            conn.execute(
                "INSERT INTO queue_items (id, message_id, status, severity_rank, verdict, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    item.id,
                    item.message_id,
                    item.status,
                    item.severity_rank,
                    item.verdict,
                    item.created_at,
                ],
            )?;
            item.id.clone()
        }
    };

    query_queue_item(conn, &id)?.ok_or_else(|| anyhow::anyhow!("queue item {} vanished during upsert", id))
}

fn query_queue_item(conn: &Connection, id: &str) -> Result<Option<QueueItemRow>> {
    conn.query_row(
        &format!("SELECT {} FROM queue_items WHERE id = ?1", QUEUE_COLUMNS),
        [id],
        queue_item_from_row,
    )
    .optional()
}

fn queue_item_from_row(row: &Row<'_>) -> rusqlite::Result<QueueItemRow> {
    Ok(QueueItemRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        status: row.get(2)?,
        severity_rank: row.get(3)?,
        verdict: row.get(4)?,
        created_at: row.get(5)?,
        claimed_by: row.get(6)?,
        claimed_at: row.get(7)?,
        resolved_at: row.get(8)?,
        resolved_by: row.get(9)?,
        resolution: row.get(10)?,
        outcome: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRow;

    fn item(id: &str, message_id: &str, rank: i64, created_at: &str) -> QueueItemRow {
        QueueItemRow {
            id: id.into(),
            message_id: message_id.into(),
            status: "QUEUED".into(),
            severity_rank: rank,
            verdict: "{}".into(),
            created_at: created_at.into(),
            claimed_by: None,
            claimed_at: None,
            resolved_at: None,
            resolved_by: None,
            resolution: None,
            outcome: None,
        }
    }

    fn record<'a>(moderator_id: &'a str, outcome: &'a str) -> ResolutionRecord<'a> {
        ResolutionRecord {
            moderator_id,
            resolved_at: "2026-01-02T00:00:00.000000Z",
            resolution: "{}",
            outcome,
        }
    }

    #[test]
    fn upsert_keeps_one_open_item_per_message() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_queue_item(&item("q1", "m1", 0, "2026-01-01T00:00:00.000000Z")).unwrap();

        let mut again = item("q2", "m1", 3, "2026-01-01T00:05:00.000000Z");
        again.verdict = r#"{"updated":true}"#.into();
        let second = db.upsert_queue_item(&again).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.severity_rank, 3);
        assert_eq!(second.verdict, r#"{"updated":true}"#);
        assert_eq!(db.count_open_queue_items().unwrap(), 1);
    }

    #[test]
    fn list_orders_by_severity_then_age() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_queue_item(&item("low-old", "m1", 0, "2026-01-01T00:00:00.000000Z")).unwrap();
        db.upsert_queue_item(&item("high-new", "m2", 2, "2026-01-01T00:10:00.000000Z")).unwrap();
        db.upsert_queue_item(&item("high-old", "m3", 2, "2026-01-01T00:01:00.000000Z")).unwrap();

        let ids: Vec<_> = db
            .list_queue(&["QUEUED"])
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["high-old", "high-new", "low-old"]);
    }

    #[test]
    fn claim_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_queue_item(&item("q1", "m1", 1, "2026-01-01T00:00:00.000000Z")).unwrap();

        assert!(matches!(db.claim_queue_item("q1", "mod-a", "t").unwrap(), ClaimOutcome::Claimed(_)));
        assert!(matches!(db.claim_queue_item("q1", "mod-a", "t").unwrap(), ClaimOutcome::AlreadyHeld(_)));
        assert!(matches!(db.claim_queue_item("q1", "mod-b", "t").unwrap(), ClaimOutcome::Conflict(_)));
        assert!(matches!(db.claim_queue_item("nope", "mod-b", "t").unwrap(), ClaimOutcome::NotFound));
    }

    #[test]
    fn resolve_requires_the_claiming_moderator() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_queue_item(&item("q1", "m1", 1, "2026-01-01T00:00:00.000000Z")).unwrap();

        // Not claimed yet: no skipping IN_REVIEW.
        assert!(matches!(
            db.resolve_queue_item("q1", &record("mod-a", "DISMISS"), None).unwrap(),
            ResolveOutcome::Conflict(_)
        ));

        db.claim_queue_item("q1", "mod-a", "t").unwrap();
        assert!(matches!(
            db.resolve_queue_item("q1", &record("mod-b", "DISMISS"), None).unwrap(),
            ResolveOutcome::Conflict(_)
        ));
        match db.resolve_queue_item("q1", &record("mod-a", "DISMISS"), None).unwrap() {
            ResolveOutcome::Resolved(row) => assert_eq!(row.status, "RESOLVED"),
            other => panic!("unexpected {:?}", other),
        }

        // A resolved item frees the message for a fresh queue item.
        let fresh = db.upsert_queue_item(&item("q2", "m1", 1, "2026-01-03T00:00:00.000000Z")).unwrap();
        assert_eq!(fresh.id, "q2");
    }

    #[test]
    fn failed_ban_rolls_back_resolution() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_queue_item(&item("q1", "m1", 1, "2026-01-01T00:00:00.000000Z")).unwrap();
        db.claim_queue_item("q1", "mod-a", "t").unwrap();

        let ban = BanRow {
            id: "b1".into(),
            user_id: "ghost".into(),
            issued_by: "mod-a".into(),
            reason: "spam".into(),
            custom_reason: None,
            thread_id: None,
            is_active: true,
            expires_at: None,
            created_at: "2026-01-02T00:00:00.000000Z".into(),
        };

        // No such user: the foreign key rejects the ban row.
        assert!(db.resolve_queue_item("q1", &record("mod-a", "BAN_AUTHOR"), Some(&ban)).is_err());
        assert_eq!(db.get_queue_item("q1").unwrap().unwrap().status, "IN_REVIEW");

        db.create_user(&UserRow {
            id: "ghost".into(),
            username: "ghost".into(),
            role: "USER".into(),
            status: "ACTIVE".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
        })
        .unwrap();
        assert!(matches!(
            db.resolve_queue_item("q1", &record("mod-a", "BAN_AUTHOR"), Some(&ban)).unwrap(),
            ResolveOutcome::Resolved(_)
        ));
        assert_eq!(db.get_user_by_id("ghost").unwrap().unwrap().status, "BANNED");
    }
}
