use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{MessageView, Role};

/// Frames sent FROM client TO server over the chat gateway.
///
/// One canonical shape per frame. Target ids are coerced leniently (number
/// or numeric string); anything else reaches the session as `None` and is
/// rejected there with `bad_id` instead of killing the whole frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    /// Fetch the recent message history.
    History,

    /// Fetch the caller's unread counter.
    Unread,

    /// Advance the caller's read cursor. Fire-and-forget: no reply frame.
    MarkRead {
        #[serde(default, deserialize_with = "coerce_id")]
        last_read_id: Option<i64>,
    },

    /// Post a new message, optionally replying to an earlier one.
    Send {
        text: String,
        #[serde(default)]
        reply_to_id: Option<i64>,
    },

    /// Soft-delete a message.
    Delete {
        #[serde(default, deserialize_with = "coerce_id")]
        id: Option<i64>,
    },

    /// Soft-delete every visible message. Moderators and admins only.
    Purge,
}

/// Frames sent FROM server TO client.
///
/// Operation replies reuse the operation name as their tag; broadcasts use
/// kebab-case event names.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    /// Sent once to an authenticated connection right after accept.
    Ready(ReadyBody),

    History(Reply<HistoryBody>),
    Unread(Reply<UnreadBody>),
    Send(Reply<SendBody>),
    Delete(Reply<Ack>),
    Purge(Reply<Ack>),

    /// Broadcast: a new message was committed.
    MessageCreated(MessageView),

    /// Broadcast: a message transitioned to soft-deleted.
    MessageDeleted { id: i64 },

    /// Broadcast: every visible message was soft-deleted.
    ChatPurged { by: String, role: Role },
}

/// Wire error codes, matching the portal client's expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Auth,
    Empty,
    BadId,
    NotFound,
    Forbidden,
    TimeLimit,
    Db,
}

/// Reply envelope: `{ok:true, ...body}` or `{ok:false, error}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Ok {
        ok: bool,
        #[serde(flatten)]
        body: T,
    },
    Err {
        ok: bool,
        error: ErrorCode,
    },
}

impl<T> Reply<T> {
    pub fn ok(body: T) -> Self {
        Reply::Ok { ok: true, body }
    }

    pub fn err(error: ErrorCode) -> Self {
        Reply::Err { ok: false, error }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyBody {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub announcement: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryBody {
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadBody {
    pub unread: i64,
    pub last_read_id: i64,
    pub max_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendBody {
    pub message: MessageView,
}

/// Empty reply body: flattens to `{ok:true}`.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {}

fn coerce_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
