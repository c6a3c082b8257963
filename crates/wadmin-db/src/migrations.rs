use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            is_admin    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS instances (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL UNIQUE,
            status              TEXT NOT NULL,
            qr_code             TEXT,
            phone_number        TEXT,
            user_id             TEXT NOT NULL REFERENCES users(id),
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            last_connected_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_instances_user
            ON instances(user_id, created_at);

        -- No foreign key to instances: deleting an instance leaves its
        -- groups and messages in place.
        CREATE TABLE IF NOT EXISTS groups (
            id          TEXT PRIMARY KEY,
            group_id    TEXT NOT NULL,
            name        TEXT NOT NULL,
            invite_code TEXT NOT NULL,
            is_member   INTEGER NOT NULL,
            instance_id TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_groups_instance
            ON groups(instance_id, created_at);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            text        TEXT NOT NULL,
            target      TEXT NOT NULL,
            is_group    INTEGER NOT NULL,
            instance_id TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL,
            sent_at     TEXT,
            error       TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_user
            ON messages(user_id, created_at);

        CREATE TABLE IF NOT EXISTS system_logs (
            id          TEXT PRIMARY KEY,
            kind        TEXT NOT NULL,
            message     TEXT NOT NULL,
            details     TEXT,
            user_id     TEXT,
            instance_id TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_system_logs_created
            ON system_logs(created_at);

        CREATE TABLE IF NOT EXISTS user_feedback (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            message     TEXT NOT NULL,
            kind        TEXT NOT NULL,
            status      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
