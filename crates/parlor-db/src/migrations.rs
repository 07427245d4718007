use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Mirror of the portal's user directory. The portal remains the
        -- source of truth; the gateway refreshes a row whenever a user
        -- connects, so author joins and foreign keys always resolve.
        CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL DEFAULT '',
            role          TEXT NOT NULL DEFAULT 'user',
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id   INTEGER NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            reply_to    INTEGER REFERENCES chat_messages(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            deleted_at  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_visible
            ON chat_messages(id) WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS read_cursors (
            user_id       INTEGER PRIMARY KEY REFERENCES users(id),
            last_read_id  INTEGER NOT NULL DEFAULT 0,
            updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS settings (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );

        INSERT OR IGNORE INTO settings (key, value)
            VALUES ('announcement', 'Welcome to the community!');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
