//! Per-connection send handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A live WebSocket connection as seen by the broker.
///
/// Sends never block: messages go onto an unbounded channel drained by the
/// connection's writer task. When the writer is gone the channel is closed
/// and [`send`](Self::send) hands the message back.
pub struct ClientConnection {
    /// Unique connection ID (`conn_<uuid>`).
    pub id: String,
    /// Remote socket address.
    pub peer: SocketAddr,
    tx: mpsc::UnboundedSender<String>,
    is_alive: AtomicBool,
    last_activity: Mutex<Instant>,
    subscribed: AtomicBool,
    retired: CancellationToken,
}

impl ClientConnection {
    /// Create a connection with a fresh ID.
    pub fn new(peer: SocketAddr, tx: mpsc::UnboundedSender<String>) -> Self {
        Self::with_id(format!("conn_{}", uuid::Uuid::now_v7()), peer, tx)
    }

    /// Create a connection with a caller-chosen ID.
    pub fn with_id(id: String, peer: SocketAddr, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            peer,
            tx,
            is_alive: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            subscribed: AtomicBool::new(false),
            retired: CancellationToken::new(),
        }
    }

    /// Queue a text message for the writer task.
    ///
    /// On failure the message is returned so the caller can buffer it.
    pub fn send(&self, message: String) -> Result<(), String> {
        self.tx.send(message).map_err(|err| err.0)
    }

    /// Whether the writer task has stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat.
    ///
    /// Returns `true` if there was activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity (or connection establishment).
    pub fn last_activity_elapsed(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Flag this connection as a route subscriber.
    pub fn mark_subscribed(&self) {
        self.subscribed.store(true, Ordering::Relaxed);
    }

    /// Whether a route was registered on this connection.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    /// Tell the writer a newer connection took over this client's record.
    pub fn retire(&self) {
        self.retired.cancel();
    }

    /// Whether [`retire`](Self::retire) was called.
    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    /// Resolves once the connection is retired.
    pub fn retired(&self) -> WaitForCancellationFuture<'_> {
        self.retired.cancelled()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn make_connection() -> (ClientConnection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ClientConnection::with_id("conn_1".into(), peer(), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id, "conn_1");
        assert_eq!(conn.peer, peer());
        assert!(!conn.is_closed());
        assert!(!conn.is_subscribed());
    }

    #[test]
    fn generated_ids_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = ClientConnection::new(peer(), tx.clone());
        let b = ClientConnection::new(peer(), tx);
        assert!(a.id.starts_with("conn_"));
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        conn.send("hola".into()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hola");
    }

    #[test]
    fn send_to_closed_channel_returns_message() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(conn.is_closed());
        assert_eq!(conn.send("perdido".into()), Err("perdido".to_string()));
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_elapsed_tracks_mark_alive() {
        let (conn, _rx) = make_connection();
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(conn.last_activity_elapsed() >= Duration::from_secs(15));

        conn.mark_alive();
        assert!(conn.last_activity_elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retire_wakes_waiter() {
        let (conn, _rx) = make_connection();
        let conn = std::sync::Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.retired().await })
        };
        assert!(!conn.is_retired());
        conn.retire();
        waiter.await.unwrap();
        assert!(conn.is_retired());
    }

    #[test]
    fn subscription_flag() {
        let (conn, _rx) = make_connection();
        conn.mark_subscribed();
        assert!(conn.is_subscribed());
    }
}
