use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Portal role attached to an identity. Unknown role strings from the
/// portal database degrade to `User` rather than failing the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "admin" => Role::Admin,
            "moderator" => Role::Moderator,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity resolved at connection time. The chat core never mutates the
/// underlying user record; it only carries these fields for the lifetime
/// of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
}

/// Canonical wire shape of a chat message. Used for history items, the
/// send acknowledgement, and the `message-created` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub text: String,
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub reply_to_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}
