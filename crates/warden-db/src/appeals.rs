use crate::models::{AppealRow, BanRow};
use crate::queue::insert_ban;
use crate::{Database, OptionalExt};
use anyhow::{Result, bail};
use rusqlite::{Connection, Row};

const APPEAL_COLUMNS: &str =
    "id, user_id, message_id, reason, status, moderator_id, response, created_at, resolved_at";

const BAN_COLUMNS: &str =
    "id, user_id, issued_by, reason, custom_reason, thread_id, is_active, expires_at, created_at";

/// Result of reviewing an appeal.
#[derive(Debug)]
pub enum AppealReview {
    Reviewed(AppealRow),
    /// The appeal already left PENDING.
    AlreadyResolved(AppealRow),
    NotFound,
}

/// Columns written when an appeal is reviewed.
pub struct AppealDecisionRecord<'a> {
    pub moderator_id: &'a str,
    /// APPROVED or DENIED
    pub status: &'a str,
    pub response: Option<&'a str>,
    pub resolved_at: &'a str,
    /// Deactivate every active ban and restore the user to ACTIVE.
    pub lift_bans: bool,
}

impl Database {
    // -- Bans --

    pub fn insert_ban(&self, ban: &BanRow) -> Result<()> {
        self.with_conn(|conn| insert_ban(conn, ban))
    }

    /// Bans flagged active that have not expired as of `now`, newest first.
    pub fn active_bans(&self, user_id: &str, now: &str) -> Result<Vec<BanRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM user_bans
                 WHERE user_id = ?1 AND is_active = 1 AND (expires_at IS NULL OR expires_at > ?2)
                 ORDER BY created_at DESC",
                BAN_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id, now], ban_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_bans(&self, user_id: &str) -> Result<Vec<BanRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM user_bans WHERE user_id = ?1 ORDER BY created_at DESC",
                BAN_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id], ban_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Appeals --

    pub fn pending_appeal_for_user(&self, user_id: &str) -> Result<Option<AppealRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM appeals WHERE user_id = ?1 AND status = 'PENDING'",
                    APPEAL_COLUMNS
                ),
                [user_id],
                appeal_from_row,
            )
            .optional()
        })
    }

    /// Insert `appeal` unless the user already has a PENDING one.
    /// Returns false when an existing pending appeal blocked the insert.
    pub fn insert_appeal_if_none_pending(&self, appeal: &AppealRow) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO appeals (id, user_id, message_id, reason, status, created_at)
                 SELECT ?1, ?2, ?3, ?4, 'PENDING', ?5
                 WHERE NOT EXISTS (
                     SELECT 1 FROM appeals WHERE user_id = ?2 AND status = 'PENDING'
                 )",
                [&appeal.id, &appeal.user_id, &appeal.message_id, &appeal.reason, &appeal.created_at],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_appeal(&self, id: &str) -> Result<Option<AppealRow>> {
        self.with_conn(|conn| query_appeal(conn, id))
    }

    /// Appeals newest first, optionally restricted to one status.
    pub fn list_appeals(&self, status: Option<&str>) -> Result<Vec<AppealRow>> {
        self.with_conn(|conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM appeals WHERE status = ?1 ORDER BY created_at DESC",
                        APPEAL_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map([status], appeal_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM appeals ORDER BY created_at DESC",
                        APPEAL_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map([], appeal_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })
    }

    /// PENDING -> APPROVED/DENIED in one transaction. With `lift_bans` the
    /// user's active bans are deactivated and their status restored to ACTIVE
    /// in the same transaction; if any statement fails nothing is applied.
    pub fn review_appeal(&self, id: &str, decision: &AppealDecisionRecord<'_>) -> Result<AppealReview> {
        self.with_tx(|tx| {
            let appeal = match query_appeal(tx, id)? {
                Some(row) => row,
                None => return Ok(AppealReview::NotFound),
            };
            if appeal.status != "PENDING" {
                return Ok(AppealReview::AlreadyResolved(appeal));
            }

            if decision.lift_bans {
                tx.execute(
                    "UPDATE user_bans SET is_active = 0 WHERE user_id = ?1 AND is_active = 1",
                    [&appeal.user_id],
                )?;
                let restored = tx.execute(
                    "UPDATE users SET status = 'ACTIVE' WHERE id = ?1",
                    [&appeal.user_id],
                )?;
                if restored != 1 {
                    bail!("user {} missing while approving appeal {}", appeal.user_id, id);
                }
            }

            let changed = tx.execute(
                "UPDATE appeals SET status = ?2, moderator_id = ?3, response = ?4, resolved_at = ?5
                 WHERE id = ?1 AND status = 'PENDING'",
                rusqlite::params![
                    id,
                    decision.status,
                    decision.moderator_id,
                    decision.response,
                    decision.resolved_at,
                ],
            )?;
            if changed != 1 {
                bail!("appeal {} changed underneath review", id);
            }

            let reviewed = query_appeal(tx, id)?
                .ok_or_else(|| anyhow::anyhow!("appeal {} vanished during review", id))?;
            Ok(AppealReview::Reviewed(reviewed))
        })
    }
}

fn query_appeal(conn: &Connection, id: &str) -> Result<Option<AppealRow>> {
    conn.query_row(
        &format!("SELECT {} FROM appeals WHERE id = ?1", APPEAL_COLUMNS),
        [id],
        appeal_from_row,
    )
    .optional()
}

fn appeal_from_row(row: &Row<'_>) -> rusqlite::Result<AppealRow> {
    Ok(AppealRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message_id: row.get(2)?,
        reason: row.get(3)?,
        status: row.get(4)?,
        moderator_id: row.get(5)?,
        response: row.get(6)?,
        created_at: row.get(7)?,
        resolved_at: row.get(8)?,
    })
}

fn ban_from_row(row: &Row<'_>) -> rusqlite::Result<BanRow> {
    Ok(BanRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        issued_by: row.get(2)?,
        reason: row.get(3)?,
        custom_reason: row.get(4)?,
        thread_id: row.get(5)?,
        is_active: row.get(6)?,
        expires_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRow;

    const NOW: &str = "2026-03-01T00:00:00.000000Z";

    fn seed_banned_user(db: &Database, id: &str, bans: usize) {
        db.create_user(&UserRow {
            id: id.into(),
            username: id.into(),
            role: "USER".into(),
            status: "BANNED".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
        })
        .unwrap();
        for i in 0..bans {
            db.insert_ban(&BanRow {
                id: format!("{}-ban-{}", id, i),
                user_id: id.into(),
                issued_by: "mod".into(),
                reason: "spam".into(),
                custom_reason: None,
                thread_id: None,
                is_active: true,
                expires_at: None,
                created_at: format!("2026-02-0{}T00:00:00.000000Z", i + 1),
            })
            .unwrap();
        }
    }

    fn appeal(id: &str, user_id: &str) -> AppealRow {
        AppealRow {
            id: id.into(),
            user_id: user_id.into(),
            message_id: "m1".into(),
            reason: "I was quoting a spammer".into(),
            status: "PENDING".into(),
            moderator_id: None,
            response: None,
            created_at: NOW.into(),
            resolved_at: None,
        }
    }

    fn approve(moderator_id: &str) -> AppealDecisionRecord<'_> {
        AppealDecisionRecord {
            moderator_id,
            status: "APPROVED",
            response: Some("welcome back"),
            resolved_at: NOW,
            lift_bans: true,
        }
    }

    #[test]
    fn expired_bans_are_not_active() {
        let db = Database::open_in_memory().unwrap();
        seed_banned_user(&db, "u1", 1);
        db.insert_ban(&BanRow {
            id: "expired".into(),
            user_id: "u1".into(),
            issued_by: "mod".into(),
            reason: "old".into(),
            custom_reason: None,
            thread_id: None,
            is_active: true,
            expires_at: Some("2026-02-15T00:00:00.000000Z".into()),
            created_at: "2026-02-10T00:00:00.000000Z".into(),
        })
        .unwrap();

        let active = db.active_bans("u1", NOW).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "u1-ban-0");
    }

    #[test]
    fn only_one_pending_appeal_per_user() {
        let db = Database::open_in_memory().unwrap();
        seed_banned_user(&db, "u1", 1);

        assert!(db.insert_appeal_if_none_pending(&appeal("a1", "u1")).unwrap());
        assert!(!db.insert_appeal_if_none_pending(&appeal("a2", "u1")).unwrap());
        assert_eq!(db.list_appeals(Some("PENDING")).unwrap().len(), 1);
    }

    #[test]
    fn approval_lifts_every_ban_and_restores_user() {
        let db = Database::open_in_memory().unwrap();
        seed_banned_user(&db, "u1", 2);
        db.insert_appeal_if_none_pending(&appeal("a1", "u1")).unwrap();

        let reviewed = db.review_appeal("a1", &approve("mod")).unwrap();
        assert!(matches!(reviewed, AppealReview::Reviewed(ref row) if row.status == "APPROVED"));

        let state = (
            db.get_user_by_id("u1").unwrap().unwrap().status,
            db.active_bans("u1", NOW).unwrap().len(),
        );
        assert_eq!(state, ("ACTIVE".to_string(), 0));

        assert!(matches!(
            db.review_appeal("a1", &approve("mod")).unwrap(),
            AppealReview::AlreadyResolved(_)
        ));
    }

    #[test]
    fn approval_failure_applies_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed_banned_user(&db, "u1", 2);
        db.insert_appeal_if_none_pending(&appeal("a1", "u1")).unwrap();

        // Make the user-status update fail after the ban update has run.
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_restore BEFORE UPDATE OF status ON users
                 BEGIN SELECT RAISE(ABORT, 'status locked'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(db.review_appeal("a1", &approve("mod")).is_err());

        let state = (
            db.get_user_by_id("u1").unwrap().unwrap().status,
            db.active_bans("u1", NOW).unwrap().len(),
            db.get_appeal("a1").unwrap().unwrap().status,
        );
        assert_eq!(state, ("BANNED".to_string(), 2, "PENDING".to_string()));
    }

    #[test]
    fn denial_keeps_bans() {
        let db = Database::open_in_memory().unwrap();
        seed_banned_user(&db, "u1", 1);
        db.insert_appeal_if_none_pending(&appeal("a1", "u1")).unwrap();

        let deny = AppealDecisionRecord {
            moderator_id: "mod",
            status: "DENIED",
            response: None,
            resolved_at: NOW,
            lift_bans: false,
        };
        db.review_appeal("a1", &deny).unwrap();

        assert_eq!(db.active_bans("u1", NOW).unwrap().len(), 1);
        assert_eq!(db.get_user_by_id("u1").unwrap().unwrap().status, "BANNED");
    }
}
