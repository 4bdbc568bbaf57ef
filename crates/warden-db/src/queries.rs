use crate::models::{MessageRow, QueueItemRow, UserRow, ViolationRow};
use crate::queue::upsert_open_item;
use crate::{Database, OptionalExt, placeholders};
use anyhow::Result;
use rusqlite::{Connection, Row};

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, role, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (&user.id, &user.username, &user.role, &user.status, &user.created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Sections --

    pub fn create_section(&self, id: &str, name: &str, metadata: &str, created_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sections (id, name, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
                [id, name, metadata, created_at],
            )?;
            Ok(())
        })
    }

    /// JSON metadata for a section, `None` if the section is unknown.
    pub fn get_section_metadata(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT metadata FROM sections WHERE id = ?1", [id], |row| row.get(0))
                .optional()
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &MessageRow, verdict_action: &str, verdict: &str) -> Result<()> {
        self.with_conn(|conn| insert_message_row(conn, message, verdict_action, verdict))
    }

    /// Store a message together with its review item, if it has one. Either
    /// both rows land or neither does.
    pub fn publish_message(
        &self,
        message: &MessageRow,
        verdict_action: &str,
        verdict: &str,
        item: Option<&QueueItemRow>,
    ) -> Result<Option<QueueItemRow>> {
        self.with_tx(|tx| {
            let stored = item.map(|item| upsert_open_item(tx, item)).transpose()?;
            insert_message_row(tx, message, verdict_action, verdict)?;
            Ok(stored)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, section_id, author_id, content, created_at FROM messages WHERE id = ?1",
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Most recent messages in a section, newest first, skipping `exclude_id`.
    pub fn recent_messages(&self, section_id: &str, exclude_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, section_id, author_id, content, created_at
                 FROM messages
                 WHERE section_id = ?1 AND id != ?2
                 ORDER BY created_at DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![section_id, exclude_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Distinct authors in a section, most recently active first.
    pub fn section_participants(&self, section_id: &str, limit: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT author_id
                 FROM messages
                 WHERE section_id = ?1
                 GROUP BY author_id
                 ORDER BY MAX(created_at) DESC
                 LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![section_id, limit], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Removed-message and ban counts for each of `user_ids` that has any history.
    pub fn violation_counts(&self, user_ids: &[String]) -> Result<Vec<ViolationRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let params: Vec<&dyn rusqlite::types::ToSql> = user_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            let marks = placeholders(user_ids.len());

            let mut counts: Vec<ViolationRow> = Vec::new();

            let removed_sql = format!(
                "SELECT m.author_id, COUNT(*)
                 FROM queue_items q
                 JOIN messages m ON m.id = q.message_id
                 WHERE q.outcome IN ('REMOVE_CONTENT', 'BAN_AUTHOR') AND m.author_id IN ({})
                 GROUP BY m.author_id",
                marks
            );
            let mut stmt = conn.prepare(&removed_sql)?;
            let removed = stmt
                .query_map(params.as_slice(), |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (user_id, n) in removed {
                counts.push(ViolationRow {
                    user_id,
                    removed_messages: n,
                    bans: 0,
                });
            }

            let bans_sql = format!(
                "SELECT user_id, COUNT(*) FROM user_bans WHERE user_id IN ({}) GROUP BY user_id",
                marks
            );
            let mut stmt = conn.prepare(&bans_sql)?;
            let bans = stmt
                .query_map(params.as_slice(), |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (user_id, n) in bans {
                match counts.iter_mut().find(|c| c.user_id == user_id) {
                    Some(existing) => existing.bans = n,
                    None => counts.push(ViolationRow {
                        user_id,
                        removed_messages: 0,
                        bans: n,
                    }),
                }
            }

            Ok(counts)
        })
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, role, status, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                role: row.get(2)?,
                status: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn insert_message_row(conn: &Connection, message: &MessageRow, verdict_action: &str, verdict: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, section_id, author_id, content, verdict_action, verdict, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            message.id,
            message.section_id,
            message.author_id,
            message.content,
            verdict_action,
            verdict,
            message.created_at,
        ],
    )?;
    Ok(())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        section_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, section: &str, author: &str, at: &str) -> MessageRow {
        MessageRow {
            id: id.into(),
            section_id: section.into(),
            author_id: author.into(),
            content: format!("content {}", id),
            created_at: at.into(),
        }
    }

    #[test]
    fn recent_messages_are_newest_first_and_capped() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            let at = format!("2026-01-01T00:00:0{}.000000Z", i);
            db.insert_message(&message(&format!("m{}", i), "s1", "a", &at), "ALLOW", "{}")
                .unwrap();
        }
        db.insert_message(&message("other", "s2", "a", "2026-01-01T00:00:09.000000Z"), "ALLOW", "{}")
            .unwrap();

        let rows = db.recent_messages("s1", "m4", 3).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
    }

    #[test]
    fn participants_are_distinct() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&message("m1", "s1", "alice", "2026-01-01T00:00:01.000000Z"), "ALLOW", "{}")
            .unwrap();
        db.insert_message(&message("m2", "s1", "bob", "2026-01-01T00:00:02.000000Z"), "ALLOW", "{}")
            .unwrap();
        db.insert_message(&message("m3", "s1", "alice", "2026-01-01T00:00:03.000000Z"), "ALLOW", "{}")
            .unwrap();

        let ids = db.section_participants("s1", 10).unwrap();
        assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);
    }

    fn open_item(id: &str, message_id: &str) -> QueueItemRow {
        QueueItemRow {
            id: id.into(),
            message_id: message_id.into(),
            status: "QUEUED".into(),
            severity_rank: 1,
            verdict: "{}".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            claimed_by: None,
            claimed_at: None,
            resolved_at: None,
            resolved_by: None,
            resolution: None,
            outcome: None,
        }
    }

    #[test]
    fn publish_writes_message_and_item_together() {
        let db = Database::open_in_memory().unwrap();
        let msg = message("m1", "s1", "alice", "2026-01-01T00:00:01.000000Z");

        let stored = db.publish_message(&msg, "FLAG", "{}", Some(&open_item("q1", "m1"))).unwrap();
        assert_eq!(stored.unwrap().id, "q1");
        assert!(db.get_message("m1").unwrap().is_some());
        assert_eq!(db.count_open_queue_items().unwrap(), 1);

        let plain = message("m2", "s1", "alice", "2026-01-01T00:00:02.000000Z");
        assert!(db.publish_message(&plain, "ALLOW", "{}", None).unwrap().is_none());
        assert_eq!(db.count_open_queue_items().unwrap(), 1);
    }

    #[test]
    fn failed_publish_leaves_no_queue_item() {
        let db = Database::open_in_memory().unwrap();
        let msg = message("m1", "s1", "alice", "2026-01-01T00:00:01.000000Z");
        db.insert_message(&msg, "ALLOW", "{}").unwrap();

        // Duplicate message id: the insert fails after the item was written.
        let err = db.publish_message(&msg, "FLAG", "{}", Some(&open_item("q1", "m1")));
        assert!(err.is_err());
        assert_eq!(db.count_open_queue_items().unwrap(), 0);
        assert!(db.get_queue_item("q1").unwrap().is_none());
    }
}
