use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use parlor_chat::{ChatError, ChatSession, Hub};
use parlor_db::Database;
use parlor_types::events::{
    Ack, ClientFrame, HistoryBody, ReadyBody, Reply, SendBody, ServerFrame,
};
use parlor_types::models::ChatIdentity;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one WebSocket connection for its whole lifetime. Identity was
/// resolved at the HTTP upgrade layer; `None` is an anonymous observer.
pub async fn handle_connection(
    socket: WebSocket,
    db: Arc<Database>,
    hub: Hub,
    identity: Option<ChatIdentity>,
) {
    let conn_id = Uuid::new_v4();
    let (mut sender, receiver) = socket.split();

    if let Some(who) = &identity {
        // Refresh the mirrored user row, then greet with the current
        // announcement banner.
        let announcement = mirror_and_fetch_announcement(&db, who).await;

        let ready = ServerFrame::Ready(ReadyBody {
            user_id: who.user_id,
            username: who.username.clone(),
            role: who.role,
            display_name: who.display_name.clone(),
            announcement,
        });
        if send_frame(&mut sender, &ready).await.is_err() {
            return;
        }

        info!(
            "{} ({}) connected to chat gateway [conn {}]",
            who.username, who.user_id, conn_id
        );
    } else {
        info!("anonymous observer connected [conn {}]", conn_id);
    }

    let session = ChatSession::new(identity, db, hub.clone());
    run_connection_loop(sender, receiver, session, hub, conn_id).await;

    info!("conn {} disconnected from chat gateway", conn_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    session: ChatSession,
    hub: Hub,
    conn_id: Uuid,
) {
    let mut broadcast_rx = hub.subscribe();

    // Replies flow from the recv task to the send task so the sink has a
    // single owner.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward broadcasts + replies -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("conn {} lagged behind by {} broadcast frames", conn_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
                result = reply_rx.recv() => {
                    let frame = match result {
                        Some(frame) => frame,
                        None => break,
                    };
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "conn {} heartbeat timeout (missed {} pongs), dropping",
                                conn_id, missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from the client.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        if let Some(frame) = handle_frame(&session, frame).await {
                            if reply_tx.send(frame).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let preview: String = text.chars().take(200).collect();
                        warn!("conn {} bad frame: {} -- raw: {}", conn_id, e, preview);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Dispatch one client frame. Returns the reply frame, if the operation
/// has one (markRead is fire-and-forget).
async fn handle_frame(session: &ChatSession, frame: ClientFrame) -> Option<ServerFrame> {
    match frame {
        ClientFrame::History => Some(ServerFrame::History(reply(
            session
                .history()
                .await
                .map(|messages| HistoryBody { messages }),
        ))),

        ClientFrame::Unread => Some(ServerFrame::Unread(reply(session.unread().await))),

        ClientFrame::MarkRead { last_read_id } => {
            session.mark_read(last_read_id).await;
            None
        }

        ClientFrame::Send { text, reply_to_id } => Some(ServerFrame::Send(reply(
            session
                .send(&text, reply_to_id)
                .await
                .map(|message| SendBody { message }),
        ))),

        ClientFrame::Delete { id } => {
            Some(ServerFrame::Delete(reply(
                session.delete(id).await.map(|()| Ack {}),
            )))
        }

        ClientFrame::Purge => Some(ServerFrame::Purge(reply(
            session.purge().await.map(|()| Ack {}),
        ))),
    }
}

/// Fold an operation result into the reply envelope. Store failures keep
/// their detail in the server log and reach the client as a bare `db`.
fn reply<T>(result: Result<T, ChatError>) -> Reply<T> {
    match result {
        Ok(body) => Reply::ok(body),
        Err(err) => {
            if let ChatError::Store(source) = &err {
                error!("store failure: {source:#}");
            }
            Reply::err(err.code())
        }
    }
}

async fn mirror_and_fetch_announcement(db: &Arc<Database>, who: &ChatIdentity) -> String {
    let db = db.clone();
    let who = who.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.mirror_user(
            who.user_id,
            &who.username,
            &who.display_name,
            who.role.as_str(),
        )?;
        db.announcement()
    })
    .await;

    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!("announcement lookup failed: {e:#}");
            String::new()
        }
        Err(e) => {
            warn!("store task failed: {e}");
            String::new()
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap();
    sender.send(Message::Text(text.into())).await
}
