//! Fan-out of advisories to every known client, and the scheduled loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tramo_core::TrafficAdvisory;

use super::Broker;
use super::registry::{ClientKey, ClientRegistry, Delivery};

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients that got the message on their live connection.
    pub delivered: usize,
    /// Clients that had the message appended to their backlog.
    pub buffered: usize,
    /// Backlogged messages flushed ahead of this one.
    pub replayed: usize,
}

impl BroadcastReport {
    /// Clients reached, live or buffered.
    pub fn recipients(&self) -> usize {
        self.delivered + self.buffered
    }
}

impl ClientRegistry {
    /// Hand `message` to every record.
    ///
    /// Each connected record flushes its backlog first so the client sees
    /// messages in the order they were produced. Any failure appends the
    /// message to the backlog and demotes the record; nothing is dropped.
    pub fn broadcast(&mut self, message: &str, now: Instant) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let keys: Vec<ClientKey> = self.keys().copied().collect();
        for key in keys {
            let Some((delivery, replayed)) = self.deliver(&key, message.to_owned(), now) else {
                continue;
            };
            report.replayed += replayed;
            match delivery {
                Delivery::Sent => report.delivered += 1,
                Delivery::Buffered => {
                    debug!(client = %key, pending = self.pending_count(&key), "advisory buffered");
                    report.buffered += 1;
                }
            }
        }
        report
    }
}

/// Broadcast the scheduled roadworks advisory every `interval` until
/// `cancel` fires. The first broadcast happens one interval after start.
pub async fn run_scheduled_advisories(broker: Arc<Broker>, interval: Duration, cancel: CancellationToken) {
    let advisory = TrafficAdvisory::scheduled_roadworks();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    info!(interval_secs = interval.as_secs_f64(), "scheduled advisories started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = broker.broadcast(&advisory);
                debug!(
                    delivered = report.delivered,
                    buffered = report.buffered,
                    replayed = report.replayed,
                    "scheduled advisory sent"
                );
            }
        }
    }
    info!("scheduled advisories stopped");
}
