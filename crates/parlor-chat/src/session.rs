use std::sync::Arc;

use chrono::Utc;
use tokio::task;
use tracing::{debug, warn};

use parlor_db::models::HistoryRow;
use parlor_db::{Database, queries};
use parlor_types::events::{ServerFrame, UnreadBody};
use parlor_types::models::{ChatIdentity, MessageView, Role};

use crate::error::ChatError;
use crate::hub::Hub;
use crate::policy;

/// Number of messages returned by `history`.
pub const HISTORY_LIMIT: u32 = 50;

/// Per-connection chat state, bound to one resolved identity for its whole
/// lifetime. `identity: None` is an anonymous observer: it still receives
/// broadcasts at the gateway layer, but every operation here is rejected.
///
/// Store work runs on the blocking pool; mutations publish their broadcast
/// while still inside the store's connection lock, so broadcast order
/// always matches commit order and a conditional update that affected no
/// rows never broadcasts.
pub struct ChatSession {
    identity: Option<ChatIdentity>,
    db: Arc<Database>,
    hub: Hub,
}

impl ChatSession {
    pub fn new(identity: Option<ChatIdentity>, db: Arc<Database>, hub: Hub) -> Self {
        Self { identity, db, hub }
    }

    pub fn identity(&self) -> Option<&ChatIdentity> {
        self.identity.as_ref()
    }

    fn require_auth(&self) -> Result<ChatIdentity, ChatError> {
        self.identity.clone().ok_or(ChatError::Unauthorized)
    }

    /// Recent history, oldest first, deleted messages redacted in place.
    pub async fn history(&self) -> Result<Vec<MessageView>, ChatError> {
        self.require_auth()?;

        let db = self.db.clone();
        let rows = run_store(move || db.recent_history(HISTORY_LIMIT)).await?;
        Ok(rows.into_iter().map(view_from_history).collect())
    }

    pub async fn unread(&self) -> Result<UnreadBody, ChatError> {
        let identity = self.require_auth()?;
        let user_id = identity.user_id;

        let db = self.db.clone();
        let (max_id, last_read_id) = run_store(move || {
            db.with_conn(|conn| {
                Ok((
                    queries::max_visible_id(conn)?,
                    queries::read_cursor(conn, user_id)?,
                ))
            })
        })
        .await?;

        Ok(UnreadBody {
            unread: (max_id - last_read_id).max(0),
            last_read_id,
            max_id,
        })
    }

    /// Fire-and-forget: no reply frame, failures only logged.
    pub async fn mark_read(&self, raw_last_read_id: Option<i64>) {
        let Some(identity) = self.identity.clone() else {
            debug!("markRead from anonymous connection ignored");
            return;
        };
        let last_read_id = raw_last_read_id.unwrap_or(0).max(0);

        let db = self.db.clone();
        match task::spawn_blocking(move || db.advance_read_cursor(identity.user_id, last_read_id))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("markRead cursor update failed: {e:#}"),
            Err(e) => warn!("markRead store task failed: {e}"),
        }
    }

    pub async fn send(
        &self,
        text: &str,
        reply_to_id: Option<i64>,
    ) -> Result<MessageView, ChatError> {
        let identity = self.require_auth()?;

        let body = text.trim().to_string();
        if body.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let db = self.db.clone();
        let hub = self.hub.clone();
        run_store(move || {
            db.with_conn(|conn| {
                let created = queries::append_message(conn, identity.user_id, &body, reply_to_id)?;
                let view = MessageView {
                    id: created.id,
                    text: body.clone(),
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                    role: identity.role,
                    display_name: identity.display_name.clone(),
                    reply_to_id,
                    created_at: created.created_at,
                    deleted: false,
                };
                hub.publish(ServerFrame::MessageCreated(view.clone()));
                Ok(view)
            })
        })
        .await
    }

    /// Soft delete. Acks the already-deleted no-op as success; broadcasts
    /// only when a row actually transitioned.
    pub async fn delete(&self, raw_id: Option<i64>) -> Result<(), ChatError> {
        let identity = self.require_auth()?;
        let id = raw_id.filter(|v| *v > 0).ok_or(ChatError::InvalidId)?;

        let db = self.db.clone();
        let hub = self.hub.clone();
        run_store(move || {
            db.with_conn(|conn| {
                let target = queries::get_message(conn, id)?.ok_or(ChatError::NotFound)?;
                policy::authorize_delete(&identity, &target, Utc::now())?;

                let affected = queries::soft_delete_message(conn, id)?;
                if affected > 0 {
                    hub.publish(ServerFrame::MessageDeleted { id });
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn purge(&self) -> Result<(), ChatError> {
        let identity = self.require_auth()?;
        policy::authorize_purge(&identity)?;

        let db = self.db.clone();
        let hub = self.hub.clone();
        run_store(move || {
            db.with_conn(|conn| {
                let purged = queries::purge_visible(conn)?;
                debug!("purge by {} cleared {} messages", identity.username, purged);
                hub.publish(ServerFrame::ChatPurged {
                    by: identity.username.clone(),
                    role: identity.role,
                });
                Ok(())
            })
        })
        .await
    }
}

/// Run a store closure on the blocking pool, recovering typed chat errors
/// that travelled through `anyhow`.
async fn run_store<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ChatError::from_store(err)),
        Err(join) => Err(ChatError::Store(anyhow::anyhow!(
            "store task failed: {join}"
        ))),
    }
}

fn view_from_history(row: HistoryRow) -> MessageView {
    MessageView {
        id: row.id,
        text: row.body,
        user_id: row.author_id,
        username: row.username,
        role: Role::parse(&row.role),
        display_name: row.display_name,
        reply_to_id: row.reply_to,
        created_at: row.created_at,
        deleted: row.deleted,
    }
}
