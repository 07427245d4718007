use chrono::{DateTime, Duration, Utc};

use parlor_db::models::MessageRow;
use parlor_types::models::{ChatIdentity, Role};

use crate::error::ChatError;

/// Owners may delete their own messages for this long after posting.
/// Moderators and admins are exempt.
pub const DELETE_WINDOW_MINUTES: i64 = 15;

pub fn can_moderate(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Moderator)
}

/// Delete authorization. An already-deleted target is permitted so the
/// caller can ack the no-op; the conditional store update keeps it from
/// broadcasting twice.
pub fn authorize_delete(
    actor: &ChatIdentity,
    target: &MessageRow,
    now: DateTime<Utc>,
) -> Result<(), ChatError> {
    if target.deleted_at.is_some() {
        return Ok(());
    }
    if can_moderate(actor.role) {
        return Ok(());
    }
    if actor.user_id != target.author_id {
        return Err(ChatError::Forbidden);
    }
    if now.signed_duration_since(target.created_at) > Duration::minutes(DELETE_WINDOW_MINUTES) {
        return Err(ChatError::TimeLimitExceeded);
    }
    Ok(())
}

pub fn authorize_purge(actor: &ChatIdentity) -> Result<(), ChatError> {
    if can_moderate(actor.role) {
        Ok(())
    } else {
        Err(ChatError::Forbidden)
    }
}
