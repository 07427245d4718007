use tokio::sync::broadcast;

use parlor_types::events::ServerFrame;

/// Capacity of the broadcast channel. Slow receivers that fall behind skip
/// frames (RecvError::Lagged) — delivery is best-effort, at most once.
const BROADCAST_CAPACITY: usize = 1024;

/// Fan-out of committed state changes to every connected session.
///
/// Each connection subscribes on accept. `publish` is called right after
/// the store commit that produced the event, on the same thread, so frames
/// go out in commit order; the channel never reorders. There is no replay:
/// a reconnecting client resynchronizes via `history`/`unread`.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<ServerFrame>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to broadcast frames. Each session calls this once.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerFrame> {
        self.tx.subscribe()
    }

    /// Publish a frame to all connected sessions, including the originator.
    /// send() errors when there are no receivers — that's fine.
    pub fn publish(&self, frame: ServerFrame) {
        let _ = self.tx.send(frame);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
