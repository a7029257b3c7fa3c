//! Shared broker state and its critical sections.
//!
//! [`Broker`] owns the [`ZoneStore`] and [`ClientRegistry`] behind a single
//! `parking_lot::Mutex`. Each public method is one critical section; sends
//! made while the lock is held only push onto unbounded channels, so the lock
//! is never held across an `.await`.

pub mod broadcast;
pub mod reaper;
pub mod registry;
pub mod zones;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};
use tramo_core::{Result, TrafficAdvisory, ZoneName};
use tramo_settings::IdentityMode;

use crate::metrics::{
    ADVISORIES_BUFFERED_TOTAL, ADVISORIES_DELIVERED_TOTAL, ADVISORIES_REPLAYED_TOTAL,
    ADVISORIES_REQUEUED_TOTAL, CLIENTS, GHOSTS_EVICTED_TOTAL, ZONES_CLOSED_TOTAL,
    ZONES_OPENED_TOTAL,
};
use crate::protocol::ROUTE_ACK;
use crate::websocket::connection::ClientConnection;

pub use broadcast::BroadcastReport;
pub use registry::{ClientKey, ClientRecord, ClientRegistry, Delivery};
pub use zones::ZoneStore;

/// Everything guarded by the broker lock.
#[derive(Debug, Default)]
pub struct BrokerState {
    /// Open and closed zones.
    pub zones: ZoneStore,
    /// Client records.
    pub clients: ClientRegistry,
}

/// Result of registering a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRegistration {
    /// Whether a new client record was created.
    pub created: bool,
    /// Route zones that were already closed, in route order.
    pub closed: Vec<ZoneName>,
    /// Backlogged messages replayed after the acknowledgment.
    pub replayed: usize,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Known client records.
    pub clients: usize,
    /// Records with a live connection.
    pub connected: usize,
    /// Buffered messages across all records.
    pub pending: usize,
    /// Open zones.
    pub open_zones: usize,
    /// Closed zones.
    pub closed_zones: usize,
}

/// The route-advisory broker.
pub struct Broker {
    state: Mutex<BrokerState>,
    identity: IdentityMode,
}

impl Broker {
    /// Create an empty broker keying clients by `identity`.
    pub fn new(identity: IdentityMode) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            identity,
        }
    }

    /// Record key for a peer address.
    pub fn client_key(&self, peer: SocketAddr) -> ClientKey {
        ClientKey::from_peer(peer, self.identity)
    }

    /// Mark `zone` open. Returns `true` if it was not already open.
    pub fn open_zone(&self, zone: &ZoneName) -> bool {
        let opened = self.state.lock().zones.mark_open(zone);
        if opened {
            counter!(ZONES_OPENED_TOTAL).increment(1);
        }
        info!(%zone, opened, "zone marked open");
        opened
    }

    /// Close an open zone and broadcast the closure advisory in the same
    /// critical section.
    ///
    /// On error nothing changes and nothing is broadcast.
    pub fn close_zone(&self, zone: &ZoneName) -> Result<BroadcastReport> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.zones.mark_closed(zone)?;
        let report = match TrafficAdvisory::road_closure(zone).to_json() {
            Ok(json) => state.clients.broadcast(&json, now),
            Err(err) => {
                error!(%zone, error = %err, "failed to serialize closure advisory");
                BroadcastReport::default()
            }
        };
        drop(state);

        counter!(ZONES_CLOSED_TOTAL).increment(1);
        record_broadcast(&report);
        info!(
            %zone,
            delivered = report.delivered,
            buffered = report.buffered,
            "zone closed, advisory broadcast"
        );
        Ok(report)
    }

    /// Attach `connection` under `key`, store `route`, and bring the client
    /// up to date.
    ///
    /// In one critical section: the acknowledgment is sent, every zone of
    /// the route is registered, one roadworks advisory goes out per zone
    /// that is already closed (route order), and finally any backlog from a
    /// previous connection is replayed. While a departed connection still
    /// owes its hand-off, all of it is buffered instead.
    pub fn register_route(
        &self,
        key: ClientKey,
        connection: Arc<ClientConnection>,
        route: Vec<ZoneName>,
    ) -> RouteRegistration {
        let now = Instant::now();
        connection.mark_subscribed();

        let mut guard = self.state.lock();
        let BrokerState { zones, clients } = &mut *guard;

        let created = clients.upsert(key, connection, now);
        let closed = zones.register_route_and_find_closed(&route);
        let _ = clients.set_route(&key, route);
        let _ = clients.push(&key, ROUTE_ACK.to_owned(), now);
        for zone in &closed {
            match TrafficAdvisory::roadworks(zone).to_json() {
                Ok(json) => {
                    let _ = clients.push(&key, json, now);
                }
                Err(err) => error!(%zone, error = %err, "failed to serialize roadworks advisory"),
            }
        }
        let replayed = clients.drain_and_send(&key, now);
        let total = clients.len();
        drop(guard);

        gauge!(CLIENTS).set(total as f64);
        if replayed > 0 {
            counter!(ADVISORIES_REPLAYED_TOTAL).increment(replayed as u64);
        }
        RouteRegistration {
            created,
            closed,
            replayed,
        }
    }

    /// Demote `key` to disconnected if `connection_id` is still attached.
    pub fn detach(&self, key: &ClientKey, connection_id: &str) -> bool {
        let detached = self.state.lock().clients.detach(key, connection_id, Instant::now());
        if detached {
            debug!(client = %key, conn_id = connection_id, "client detached");
        }
        detached
    }

    /// Refresh the client's `last_seen`.
    pub fn touch(&self, key: &ClientKey) {
        self.state.lock().clients.touch(key, Instant::now());
    }

    /// Broadcast `advisory` to every known client.
    pub fn broadcast(&self, advisory: &TrafficAdvisory) -> BroadcastReport {
        let json = match advisory.to_json() {
            Ok(json) => json,
            Err(err) => {
                error!(error = %err, "failed to serialize advisory");
                return BroadcastReport::default();
            }
        };
        let report = self.state.lock().clients.broadcast(&json, Instant::now());
        record_broadcast(&report);
        report
    }

    /// Put messages a writer could not deliver back at the head of the
    /// client's backlog and settle the connection's hand-off.
    ///
    /// Every session that registered a route calls this exactly once when it
    /// ends, with an empty list if everything was written.
    pub fn restore_undelivered(&self, key: &ClientKey, connection_id: &str, messages: Vec<String>) -> usize {
        let restored = self
            .state
            .lock()
            .clients
            .restore_undelivered(key, connection_id, messages, Instant::now());
        if restored > 0 {
            counter!(ADVISORIES_REQUEUED_TOTAL).increment(restored as u64);
            debug!(client = %key, conn_id = connection_id, restored, "requeued undelivered messages");
        }
        restored
    }

    /// Evict clients disconnected for longer than `threshold`.
    pub fn sweep_ghosts(&self, threshold: Duration) -> Vec<ClientKey> {
        let mut state = self.state.lock();
        let evicted = state.clients.sweep_ghosts(threshold, Instant::now());
        let total = state.clients.len();
        drop(state);

        if !evicted.is_empty() {
            counter!(GHOSTS_EVICTED_TOTAL).increment(evicted.len() as u64);
        }
        gauge!(CLIENTS).set(total as f64);
        evicted
    }

    /// Current counters.
    pub fn stats(&self) -> BrokerStats {
        let state = self.state.lock();
        BrokerStats {
            clients: state.clients.len(),
            connected: state.clients.connected_count(),
            pending: state.clients.total_pending(),
            open_zones: state.zones.open_count(),
            closed_zones: state.zones.closed_count(),
        }
    }

    /// Read-only access to the guarded state.
    pub fn inspect<R>(&self, f: impl FnOnce(&BrokerState) -> R) -> R {
        f(&self.state.lock())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("identity", &self.identity)
            .field("stats", &self.stats())
            .finish()
    }
}

fn record_broadcast(report: &BroadcastReport) {
    counter!(ADVISORIES_DELIVERED_TOTAL).increment(report.delivered as u64);
    counter!(ADVISORIES_BUFFERED_TOTAL).increment(report.buffered as u64);
    if report.replayed > 0 {
        counter!(ADVISORIES_REPLAYED_TOTAL).increment(report.replayed as u64);
    }
}
