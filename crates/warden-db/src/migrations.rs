use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("DB: running migration v1 (platform tables)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                role        TEXT NOT NULL DEFAULT 'USER',
                status      TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE sections (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                metadata    TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL
            );

            -- No foreign keys to sections/users: messages may reference records
            -- owned by other services.
            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                section_id      TEXT NOT NULL,
                author_id       TEXT NOT NULL,
                content         TEXT NOT NULL,
                verdict_action  TEXT NOT NULL,
                verdict         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_section
                ON messages(section_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("DB: running migration v2 (moderation tables)");
        conn.execute_batch(
            "
            CREATE TABLE content_safety_rules (
                id          TEXT PRIMARY KEY,
                pattern     TEXT NOT NULL,
                category    TEXT NOT NULL,
                severity    TEXT NOT NULL,
                action      TEXT NOT NULL,
                enabled     INTEGER NOT NULL DEFAULT 1,
                created_by  TEXT NOT NULL,
                metadata    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE(pattern, category)
            );

            CREATE TABLE queue_items (
                id              TEXT PRIMARY KEY,
                message_id      TEXT NOT NULL,
                status          TEXT NOT NULL,
                severity_rank   INTEGER NOT NULL,
                verdict         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                claimed_by      TEXT,
                claimed_at      TEXT,
                resolved_at     TEXT,
                resolved_by     TEXT,
                resolution      TEXT,
                outcome         TEXT
            );

            -- At most one open item per message; resolved items stay as history.
            CREATE UNIQUE INDEX idx_queue_items_open_message
                ON queue_items(message_id) WHERE status != 'RESOLVED';

            CREATE INDEX idx_queue_items_triage
                ON queue_items(status, severity_rank DESC, created_at);

            CREATE TABLE user_bans (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                issued_by       TEXT NOT NULL,
                reason          TEXT NOT NULL,
                custom_reason   TEXT,
                thread_id       TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                expires_at      TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_user_bans_user
                ON user_bans(user_id, is_active);

            CREATE TABLE appeals (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                message_id      TEXT NOT NULL,
                reason          TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'PENDING',
                moderator_id    TEXT,
                response        TEXT,
                created_at      TEXT NOT NULL,
                resolved_at     TEXT
            );

            CREATE UNIQUE INDEX idx_appeals_one_pending
                ON appeals(user_id) WHERE status = 'PENDING';

            CREATE TABLE moderation_stats (
                window_start    INTEGER PRIMARY KEY,
                window_end      INTEGER NOT NULL,
                allow_count     INTEGER NOT NULL,
                flag_count      INTEGER NOT NULL,
                queue_count     INTEGER NOT NULL,
                block_count     INTEGER NOT NULL,
                total_evaluated INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
