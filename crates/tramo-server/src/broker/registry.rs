//! Client records keyed by peer identity.
//!
//! A record outlives its connection: when the socket goes away the record is
//! demoted to disconnected and keeps buffering advisories until the client
//! reconnects under the same key or the reaper evicts it.
//!
//! A connection that leaves a record (detached, demoted, or replaced by a
//! newer one) may still hold messages its writer never put on the wire. Its
//! ID stays in the record's hand-off list until the session returns those
//! messages through [`ClientRegistry::restore_undelivered`]. Until then the
//! record only buffers, so the returned messages go out ahead of anything
//! produced after them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use tramo_core::ZoneName;
use tramo_settings::IdentityMode;

use crate::websocket::connection::ClientConnection;

/// Identity of a client record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientKey {
    ip: IpAddr,
    port: Option<u16>,
}

impl ClientKey {
    /// Derive the key for `peer` under `mode`.
    pub fn from_peer(peer: SocketAddr, mode: IdentityMode) -> Self {
        let port = match mode {
            IdentityMode::AddressPort => Some(peer.port()),
            IdentityMode::Address => None,
        };
        Self { ip: peer.ip(), port }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}", SocketAddr::new(self.ip, port)),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// What happened to a message handed to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the live connection.
    Sent,
    /// Appended to the pending backlog.
    Buffered,
}

/// Per-client state.
#[derive(Debug)]
pub struct ClientRecord {
    route: Vec<ZoneName>,
    connection: Option<Arc<ClientConnection>>,
    pending: VecDeque<String>,
    handoffs: Vec<String>,
    last_seen: Instant,
}

impl ClientRecord {
    fn new(connection: Arc<ClientConnection>, now: Instant) -> Self {
        Self {
            route: Vec::new(),
            connection: Some(connection),
            pending: VecDeque::new(),
            handoffs: Vec::new(),
            last_seen: now,
        }
    }

    /// Registered route, in order.
    pub fn route(&self) -> &[ZoneName] {
        &self.route
    }

    /// Whether a live connection is attached.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// ID of the attached connection, if any.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection.as_deref().map(|c| c.id.as_str())
    }

    /// Buffered messages, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Number of buffered messages.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Last time this record had a successful send, a route registration,
    /// inbound activity, or a detach.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Whether a departed connection has not returned its unsent messages
    /// yet.
    pub fn awaiting_handoff(&self) -> bool {
        !self.handoffs.is_empty()
    }

    /// The attached connection, unless a hand-off is outstanding.
    fn writable(&self) -> Option<Arc<ClientConnection>> {
        if self.handoffs.is_empty() {
            self.connection.clone()
        } else {
            None
        }
    }

    fn release(&mut self, now: Instant) -> Option<Arc<ClientConnection>> {
        let conn = self.connection.take();
        if let Some(conn) = &conn {
            self.handoffs.push(conn.id.clone());
        }
        self.last_seen = now;
        conn
    }

    fn demote(&mut self, now: Instant) {
        if let Some(conn) = self.release(now) {
            warn!(conn_id = %conn.id, peer = %conn.peer, "send failed, demoting client to disconnected");
        }
    }

    /// Send `message` without flushing the backlog first. Buffers and
    /// demotes on failure.
    pub(crate) fn push(&mut self, message: String, now: Instant) -> Delivery {
        let Some(conn) = self.writable() else {
            self.pending.push_back(message);
            return Delivery::Buffered;
        };
        match conn.send(message) {
            Ok(()) => {
                self.last_seen = now;
                Delivery::Sent
            }
            Err(message) => {
                self.pending.push_back(message);
                self.demote(now);
                Delivery::Buffered
            }
        }
    }

    /// Flush the backlog in FIFO order while connected.
    ///
    /// Stops at the first failure, putting the failed message back at the
    /// head and demoting the record. Returns the number of messages sent.
    pub(crate) fn drain_pending(&mut self, now: Instant) -> usize {
        let mut sent = 0;
        loop {
            let Some(conn) = self.writable() else { break };
            let Some(message) = self.pending.pop_front() else { break };
            if let Err(message) = conn.send(message) {
                self.pending.push_front(message);
                self.demote(now);
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            self.last_seen = now;
        }
        sent
    }

    /// Flush the backlog, then send `message` (or buffer it behind whatever
    /// could not be flushed). Also returns how many backlog messages went
    /// out ahead of it.
    pub(crate) fn deliver(&mut self, message: String, now: Instant) -> (Delivery, usize) {
        let replayed = self.drain_pending(now);
        (self.push(message, now), replayed)
    }
}

/// All known clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientKey, ClientRecord>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `connection` to the record for `key`, creating it if needed.
    ///
    /// An existing record keeps its route and backlog. A different
    /// connection already attached is retired and owes a hand-off. Returns
    /// `true` when a new record was created.
    pub fn upsert(&mut self, key: ClientKey, connection: Arc<ClientConnection>, now: Instant) -> bool {
        match self.clients.get_mut(&key) {
            Some(record) => {
                if let Some(previous) = record.connection.take() {
                    if previous.id != connection.id {
                        debug!(%key, previous = %previous.id, next = %connection.id, "replacing attached connection");
                        previous.retire();
                        record.handoffs.push(previous.id.clone());
                    }
                }
                record.connection = Some(connection);
                record.last_seen = now;
                false
            }
            None => {
                let _ = self.clients.insert(key, ClientRecord::new(connection, now));
                true
            }
        }
    }

    /// Replace the route of an existing record.
    pub fn set_route(&mut self, key: &ClientKey, route: Vec<ZoneName>) -> bool {
        match self.clients.get_mut(key) {
            Some(record) => {
                record.route = route;
                true
            }
            None => false,
        }
    }

    /// Drop the connection of `key` if it is still `connection_id`.
    ///
    /// A newer connection attached under the same key is left alone.
    /// Returns `true` if the record was demoted.
    pub fn detach(&mut self, key: &ClientKey, connection_id: &str, now: Instant) -> bool {
        let Some(record) = self.clients.get_mut(key) else {
            return false;
        };
        if record.connection_id() != Some(connection_id) {
            return false;
        }
        let _ = record.release(now);
        true
    }

    /// Append `message` to the backlog of `key`.
    pub fn enqueue(&mut self, key: &ClientKey, message: String) -> bool {
        match self.clients.get_mut(key) {
            Some(record) => {
                record.pending.push_back(message);
                true
            }
            None => false,
        }
    }

    /// Flush the backlog of `key`, then send `message` or buffer it. Returns
    /// the outcome and the number of backlog messages flushed first.
    pub fn deliver(&mut self, key: &ClientKey, message: String, now: Instant) -> Option<(Delivery, usize)> {
        self.clients.get_mut(key).map(|r| r.deliver(message, now))
    }

    /// Send `message` to `key` ahead of its backlog, buffering on failure.
    pub fn push(&mut self, key: &ClientKey, message: String, now: Instant) -> Option<Delivery> {
        self.clients.get_mut(key).map(|r| r.push(message, now))
    }

    /// Flush the backlog of `key` if it is connected. Returns how many
    /// messages were sent.
    pub fn drain_and_send(&mut self, key: &ClientKey, now: Instant) -> usize {
        self.clients
            .get_mut(key)
            .map_or(0, |record| record.drain_pending(now))
    }

    /// Put messages a writer task failed to deliver back at the head of the
    /// backlog, preserving their order, and settle the hand-off owed by
    /// `connection_id`.
    ///
    /// The record is demoted if `connection_id` is still attached. Once no
    /// hand-off is outstanding, the backlog is flushed to whichever
    /// connection is attached. Returns the number of messages restored.
    pub fn restore_undelivered(
        &mut self,
        key: &ClientKey,
        connection_id: &str,
        messages: Vec<String>,
        now: Instant,
    ) -> usize {
        let Some(record) = self.clients.get_mut(key) else {
            return 0;
        };
        let restored = messages.len();
        for message in messages.into_iter().rev() {
            record.pending.push_front(message);
        }
        if record.connection_id() == Some(connection_id) {
            record.connection = None;
            record.last_seen = now;
        }
        record.handoffs.retain(|id| id != connection_id);
        let _ = record.drain_pending(now);
        restored
    }

    /// Refresh `last_seen` for `key`.
    pub fn touch(&mut self, key: &ClientKey, now: Instant) {
        if let Some(record) = self.clients.get_mut(key) {
            record.last_seen = now;
        }
    }

    /// Remove disconnected records whose `last_seen` is more than
    /// `threshold` before `now`. Returns the evicted keys.
    pub fn sweep_ghosts(&mut self, threshold: Duration, now: Instant) -> Vec<ClientKey> {
        let ghosts: Vec<ClientKey> = self
            .clients
            .iter()
            .filter(|(_, r)| !r.is_connected() && now.saturating_duration_since(r.last_seen) > threshold)
            .map(|(key, _)| *key)
            .collect();
        for key in &ghosts {
            let _ = self.clients.remove(key);
        }
        ghosts
    }

    /// Keys of every record.
    pub fn keys(&self) -> impl Iterator<Item = &ClientKey> {
        self.clients.keys()
    }

    /// Look up a record.
    pub fn get(&self, key: &ClientKey) -> Option<&ClientRecord> {
        self.clients.get(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of records with a live connection.
    pub fn connected_count(&self) -> usize {
        self.clients.values().filter(|r| r.is_connected()).count()
    }

    /// Buffered messages for `key`.
    pub fn pending_count(&self, key: &ClientKey) -> usize {
        self.clients.get(key).map_or(0, ClientRecord::pending_len)
    }

    /// Buffered messages across all records.
    pub fn total_pending(&self) -> usize {
        self.clients.values().map(ClientRecord::pending_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], port))
    }

    fn key(port: u16) -> ClientKey {
        ClientKey::from_peer(peer(port), IdentityMode::AddressPort)
    }

    fn conn(id: &str, port: u16) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ClientConnection::with_id(id.into(), peer(port), tx)), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn key_modes() {
        let a = ClientKey::from_peer(peer(1000), IdentityMode::Address);
        let b = ClientKey::from_peer(peer(2000), IdentityMode::Address);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "10.0.0.7");

        let c = ClientKey::from_peer(peer(1000), IdentityMode::AddressPort);
        let d = ClientKey::from_peer(peer(2000), IdentityMode::AddressPort);
        assert_ne!(c, d);
        assert_eq!(c.to_string(), "10.0.0.7:1000");
    }

    #[test]
    fn ipv6_key_display() {
        let peer: SocketAddr = "[::1]:8765".parse().unwrap();
        assert_eq!(ClientKey::from_peer(peer, IdentityMode::AddressPort).to_string(), "[::1]:8765");
        assert_eq!(ClientKey::from_peer(peer, IdentityMode::Address).to_string(), "::1");
    }

    #[test]
    fn upsert_creates_then_reattaches() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx1) = conn("c1", 1);
        assert!(reg.upsert(key(1), c1, now));
        assert!(reg.set_route(&key(1), vec![ZoneName::new("Madrid").unwrap()]));
        assert!(reg.enqueue(&key(1), "old".into()));

        let (c2, _rx2) = conn("c2", 1);
        assert!(!reg.upsert(key(1), c2, now));
        let record = reg.get(&key(1)).unwrap();
        assert_eq!(record.connection_id(), Some("c2"));
        assert_eq!(record.route().len(), 1);
        assert_eq!(record.pending_len(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn set_route_on_unknown_key() {
        let mut reg = ClientRegistry::new();
        assert!(!reg.set_route(&key(1), Vec::new()));
        assert!(!reg.enqueue(&key(1), "x".into()));
        assert!(reg.deliver(&key(1), "x".into(), Instant::now()).is_none());
    }

    #[test]
    fn detach_only_matching_connection() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx1) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let (c2, _rx2) = conn("c2", 1);
        let _ = reg.upsert(key(1), c2, now);

        assert!(!reg.detach(&key(1), "c1", now));
        assert!(reg.get(&key(1)).unwrap().is_connected());
        assert!(reg.get(&key(1)).unwrap().awaiting_handoff());

        assert!(reg.detach(&key(1), "c2", now));
        assert!(!reg.get(&key(1)).unwrap().is_connected());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn deliver_flushes_backlog_first() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, mut rx) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.enqueue(&key(1), "a".into());
        let _ = reg.enqueue(&key(1), "b".into());

        assert_eq!(reg.deliver(&key(1), "c".into(), now), Some((Delivery::Sent, 2)));
        assert_eq!(drain(&mut rx), ["a", "b", "c"]);
        assert_eq!(reg.pending_count(&key(1)), 0);
    }

    #[test]
    fn push_skips_backlog() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, mut rx) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.enqueue(&key(1), "old".into());

        assert_eq!(reg.push(&key(1), "ack".into(), now), Some(Delivery::Sent));
        assert_eq!(reg.drain_and_send(&key(1), now), 1);
        assert_eq!(drain(&mut rx), ["ack", "old"]);
    }

    #[test]
    fn deliver_to_disconnected_buffers() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.detach(&key(1), "c1", now);

        assert_eq!(reg.deliver(&key(1), "x".into(), now), Some((Delivery::Buffered, 0)));
        assert_eq!(reg.drain_and_send(&key(1), now), 0);
        assert_eq!(reg.get(&key(1)).unwrap().pending().collect::<Vec<_>>(), ["x"]);
    }

    #[test]
    fn failed_send_demotes_and_buffers() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, rx) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.enqueue(&key(1), "a".into());
        drop(rx);

        assert_eq!(reg.deliver(&key(1), "b".into(), now), Some((Delivery::Buffered, 0)));
        let record = reg.get(&key(1)).unwrap();
        assert!(!record.is_connected());
        assert!(record.awaiting_handoff());
        assert_eq!(record.pending().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn restore_prepends_and_demotes() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.enqueue(&key(1), "later".into());

        let restored = reg.restore_undelivered(&key(1), "c1", vec!["first".into(), "second".into()], now);
        assert_eq!(restored, 2);
        let record = reg.get(&key(1)).unwrap();
        assert!(!record.is_connected());
        assert_eq!(record.pending().collect::<Vec<_>>(), ["first", "second", "later"]);
    }

    #[test]
    fn replacement_retires_previous_connection() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx1) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1.clone(), now);
        assert!(!c1.is_retired());

        let (c2, _rx2) = conn("c2", 1);
        let _ = reg.upsert(key(1), c2.clone(), now);
        assert!(c1.is_retired());
        assert!(!c2.is_retired());
    }

    #[test]
    fn newer_connection_waits_for_handoff() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, mut rx1) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.deliver(&key(1), "m1".into(), now);
        assert_eq!(drain(&mut rx1), ["m1"]);

        // c1's writer never wrote m1 when c2 takes over.
        let (c2, mut rx2) = conn("c2", 1);
        let _ = reg.upsert(key(1), c2, now);
        assert_eq!(reg.push(&key(1), "ack".into(), now), Some(Delivery::Buffered));
        assert_eq!(reg.deliver(&key(1), "m2".into(), now), Some((Delivery::Buffered, 0)));
        assert!(drain(&mut rx2).is_empty());

        assert_eq!(reg.restore_undelivered(&key(1), "c1", vec!["m1".into()], now), 1);
        assert_eq!(drain(&mut rx2), ["m1", "ack", "m2"]);
        let record = reg.get(&key(1)).unwrap();
        assert!(record.is_connected());
        assert!(!record.awaiting_handoff());
        assert_eq!(record.pending_len(), 0);
    }

    #[test]
    fn detached_connection_owes_handoff_before_reconnect_replay() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx1) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, now);
        assert!(reg.detach(&key(1), "c1", now));
        let _ = reg.enqueue(&key(1), "later".into());

        let (c2, mut rx2) = conn("c2", 1);
        let _ = reg.upsert(key(1), c2, now);
        assert_eq!(reg.drain_and_send(&key(1), now), 0);

        let _ = reg.restore_undelivered(&key(1), "c1", vec!["earlier".into()], now);
        assert_eq!(drain(&mut rx2), ["earlier", "later"]);
    }

    #[test]
    fn every_departed_connection_must_hand_off() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx1) = conn("c1", 1);
        let (c2, _rx2) = conn("c2", 1);
        let (c3, mut rx3) = conn("c3", 1);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.upsert(key(1), c2, now);
        let _ = reg.upsert(key(1), c3, now);
        let _ = reg.enqueue(&key(1), "x".into());

        let _ = reg.restore_undelivered(&key(1), "c2", Vec::new(), now);
        assert!(drain(&mut rx3).is_empty());
        let _ = reg.restore_undelivered(&key(1), "c1", Vec::new(), now);
        assert_eq!(drain(&mut rx3), ["x"]);
    }

    #[test]
    fn restore_for_unknown_key_is_noop() {
        let mut reg = ClientRegistry::new();
        assert_eq!(reg.restore_undelivered(&key(9), "c9", vec!["x".into()], Instant::now()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_stale_disconnected() {
        let mut reg = ClientRegistry::new();
        let threshold = Duration::from_secs(60);
        let (live, _rx1) = conn("live", 1);
        let (gone, _rx2) = conn("gone", 2);
        let (fresh, _rx3) = conn("fresh", 3);
        let start = Instant::now();
        let _ = reg.upsert(key(1), live, start);
        let _ = reg.upsert(key(2), gone, start);
        let _ = reg.detach(&key(2), "gone", start);

        tokio::time::advance(Duration::from_secs(50)).await;
        let _ = reg.upsert(key(3), fresh, Instant::now());
        let _ = reg.detach(&key(3), "fresh", Instant::now());

        // Exactly at the threshold nothing goes.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(reg.sweep_ghosts(threshold, Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(reg.sweep_ghosts(threshold, Instant::now()), vec![key(2)]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get(&key(1)).is_some());
        assert!(reg.get(&key(3)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_postpones_eviction() {
        let mut reg = ClientRegistry::new();
        let (c1, _rx) = conn("c1", 1);
        let _ = reg.upsert(key(1), c1, Instant::now());
        let _ = reg.detach(&key(1), "c1", Instant::now());

        tokio::time::advance(Duration::from_secs(45)).await;
        reg.touch(&key(1), Instant::now());
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(reg.sweep_ghosts(Duration::from_secs(60), Instant::now()).is_empty());
    }

    #[test]
    fn counts() {
        let mut reg = ClientRegistry::new();
        let now = Instant::now();
        let (c1, _rx1) = conn("c1", 1);
        let (c2, _rx2) = conn("c2", 2);
        let _ = reg.upsert(key(1), c1, now);
        let _ = reg.upsert(key(2), c2, now);
        let _ = reg.detach(&key(2), "c2", now);
        let _ = reg.enqueue(&key(2), "x".into());
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.connected_count(), 1);
        assert_eq!(reg.pending_count(&key(2)), 1);
        assert_eq!(reg.pending_count(&key(1)), 0);
        assert_eq!(reg.total_pending(), 1);
        assert!(!reg.is_empty());
    }
}
