/// Database row types — these map directly to SQLite rows.
/// Distinct from parlor-types wire models to keep the DB layer independent.
use chrono::{DateTime, Utc};

/// Raw message row, as fetched for the moderation policy.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub author_id: i64,
    pub body: String,
    pub reply_to: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// History row joined with the author summary. `body` is already redacted
/// when the row is soft-deleted.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: i64,
    pub author_id: i64,
    pub username: String,
    pub role: String,
    pub display_name: String,
    pub body: String,
    pub reply_to: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Result of appending a message: the store-assigned id and timestamp.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}
