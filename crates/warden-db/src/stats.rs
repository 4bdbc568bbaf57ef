use crate::models::StatsRow;
use crate::Database;
use anyhow::Result;
use rusqlite::Row;

impl Database {
    /// Write-once insert. Returns false if a row for the window already exists;
    /// the existing row is left untouched.
    pub fn insert_stats_if_absent(&self, stats: &StatsRow) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO moderation_stats
                    (window_start, window_end, allow_count, flag_count, queue_count, block_count, total_evaluated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                [
                    stats.window_start,
                    stats.window_end,
                    stats.allow_count,
                    stats.flag_count,
                    stats.queue_count,
                    stats.block_count,
                    stats.total_evaluated,
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Most recent windows first.
    pub fn recent_stats(&self, limit: u32) -> Result<Vec<StatsRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT window_start, window_end, allow_count, flag_count, queue_count, block_count, total_evaluated
                 FROM moderation_stats
                 ORDER BY window_start DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], stats_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<StatsRow> {
    Ok(StatsRow {
        window_start: row.get(0)?,
        window_end: row.get(1)?,
        allow_count: row.get(2)?,
        flag_count: row.get(3)?,
        queue_count: row.get(4)?,
        block_count: row.get(5)?,
        total_evaluated: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: i64, allow: i64) -> StatsRow {
        StatsRow {
            window_start: start,
            window_end: start + 3600,
            allow_count: allow,
            flag_count: 0,
            queue_count: 0,
            block_count: 0,
            total_evaluated: allow,
        }
    }

    #[test]
    fn rows_are_write_once() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_stats_if_absent(&window(0, 5)).unwrap());
        assert!(!db.insert_stats_if_absent(&window(0, 99)).unwrap());

        let rows = db.recent_stats(10).unwrap();
        assert_eq!(rows, vec![window(0, 5)]);
    }

    #[test]
    fn recent_stats_are_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for start in [0, 3600, 7200] {
            db.insert_stats_if_absent(&window(start, 1)).unwrap();
        }

        let starts: Vec<_> = db.recent_stats(2).unwrap().iter().map(|r| r.window_start).collect();
        assert_eq!(starts, vec![7200, 3600]);
    }
}
