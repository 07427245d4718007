use crate::models::{HistoryRow, MessageRow, NewMessage};
use crate::{Database, REDACTION_MARKER};
use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

impl Database {
    // -- Users --

    /// Refresh the mirrored user row from a resolved identity. The portal
    /// owns the user directory; this keeps author joins and foreign keys
    /// resolvable on this side.
    pub fn mirror_user(
        &self,
        user_id: i64,
        username: &str,
        display_name: &str,
        role: &str,
    ) -> Result<()> {
        self.with_conn(|conn| mirror_user(conn, user_id, username, display_name, role))
    }

    // -- Messages --

    pub fn append_message(
        &self,
        author_id: i64,
        body: &str,
        reply_to: Option<i64>,
    ) -> Result<NewMessage> {
        self.with_conn(|conn| append_message(conn, author_id, body, reply_to))
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| get_message(conn, id))
    }

    pub fn soft_delete_message(&self, id: i64) -> Result<usize> {
        self.with_conn(|conn| soft_delete_message(conn, id))
    }

    pub fn purge_visible(&self) -> Result<usize> {
        self.with_conn(purge_visible)
    }

    pub fn recent_history(&self, limit: u32) -> Result<Vec<HistoryRow>> {
        self.with_conn(|conn| recent_history(conn, limit))
    }

    pub fn max_visible_id(&self) -> Result<i64> {
        self.with_conn(max_visible_id)
    }

    // -- Read cursors --

    pub fn read_cursor(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| read_cursor(conn, user_id))
    }

    pub fn advance_read_cursor(&self, user_id: i64, last_read_id: i64) -> Result<()> {
        self.with_conn(|conn| advance_read_cursor(conn, user_id, last_read_id))
    }

    // -- Settings --

    pub fn announcement(&self) -> Result<String> {
        self.with_conn(announcement)
    }
}

pub fn mirror_user(
    conn: &Connection,
    user_id: i64,
    username: &str,
    display_name: &str,
    role: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, display_name, role) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             username = excluded.username,
             display_name = excluded.display_name,
             role = excluded.role",
        rusqlite::params![user_id, username, display_name, role],
    )?;
    Ok(())
}

pub fn append_message(
    conn: &Connection,
    author_id: i64,
    body: &str,
    reply_to: Option<i64>,
) -> Result<NewMessage> {
    let body = body.trim();
    if body.is_empty() {
        bail!("message body is empty");
    }

    conn.execute(
        "INSERT INTO chat_messages (author_id, body, reply_to) VALUES (?1, ?2, ?3)",
        rusqlite::params![author_id, body, reply_to],
    )?;
    let id = conn.last_insert_rowid();

    let created_at: String = conn.query_row(
        "SELECT created_at FROM chat_messages WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;

    Ok(NewMessage {
        id,
        created_at: parse_timestamp(&created_at),
    })
}

pub fn get_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, author_id, body, reply_to, created_at, deleted_at
         FROM chat_messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })
        .optional()?;

    Ok(row.map(
        |(id, author_id, body, reply_to, created_at, deleted_at)| MessageRow {
            id,
            author_id,
            body,
            reply_to,
            created_at: parse_timestamp(&created_at),
            deleted_at: deleted_at.map(|raw| parse_timestamp(&raw)),
        },
    ))
}

/// Conditional soft delete: only rows still visible transition. Returns the
/// affected-row count, so the caller knows whether a state change actually
/// occurred (and therefore whether to broadcast).
pub fn soft_delete_message(conn: &Connection, id: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE chat_messages SET deleted_at = datetime('now')
         WHERE id = ?1 AND deleted_at IS NULL",
        [id],
    )?;
    Ok(affected)
}

pub fn purge_visible(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE chat_messages SET deleted_at = datetime('now')
         WHERE deleted_at IS NULL",
        [],
    )?;
    Ok(affected)
}

/// Newest `limit` messages joined with their author summary, oldest first.
/// Soft-deleted rows keep their place with the body redacted.
pub fn recent_history(conn: &Connection, limit: u32) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, author_id, username, role, display_name, body, reply_to, created_at, deleted_at
         FROM (
             SELECT m.id, m.author_id,
                    COALESCE(u.username, 'unknown') AS username,
                    COALESCE(u.role, 'user') AS role,
                    COALESCE(u.display_name, '') AS display_name,
                    m.body, m.reply_to, m.created_at, m.deleted_at
             FROM chat_messages m
             LEFT JOIN users u ON m.author_id = u.id
             ORDER BY m.id DESC
             LIMIT ?1
         )
         ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(
            |(id, author_id, username, role, display_name, body, reply_to, created_at, deleted_at)| {
                let deleted = deleted_at.is_some();
                HistoryRow {
                    id,
                    author_id,
                    username,
                    role,
                    display_name,
                    body: if deleted { REDACTION_MARKER.to_string() } else { body },
                    reply_to,
                    created_at: parse_timestamp(&created_at),
                    deleted,
                }
            },
        )
        .collect())
}

pub fn max_visible_id(conn: &Connection) -> Result<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM chat_messages WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(max)
}

pub fn read_cursor(conn: &Connection, user_id: i64) -> Result<i64> {
    let cursor: Option<i64> = conn
        .query_row(
            "SELECT last_read_id FROM read_cursors WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(cursor.unwrap_or(0))
}

/// Upsert clamped to the highest value seen: a stale client can never move
/// another session's cursor backwards.
pub fn advance_read_cursor(conn: &Connection, user_id: i64, last_read_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO read_cursors (user_id, last_read_id, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(user_id) DO UPDATE SET
             last_read_id = MAX(read_cursors.last_read_id, excluded.last_read_id),
             updated_at = excluded.updated_at",
        rusqlite::params![user_id, last_read_id],
    )?;
    Ok(())
}

pub fn announcement(conn: &Connection) -> Result<String> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = 'announcement'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or_default())
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse RFC 3339 first, then fall back to naive UTC.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
