//! Periodic eviction of long-disconnected clients.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Broker;
use super::registry::ClientKey;

/// Sweep once, logging each evicted client.
pub fn reap_once(broker: &Broker, threshold: Duration) -> Vec<ClientKey> {
    let evicted = broker.sweep_ghosts(threshold);
    for key in &evicted {
        info!(client = %key, threshold_secs = threshold.as_secs(), "evicted ghost client");
    }
    evicted
}

/// Run [`reap_once`] every `interval` until `cancel` fires.
pub async fn run_ghost_reaper(
    broker: Arc<Broker>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    info!(
        interval_secs = interval.as_secs_f64(),
        threshold_secs = threshold.as_secs(),
        "ghost reaper started"
    );
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = reap_once(&broker, threshold);
                debug!(evicted = evicted.len(), remaining = broker.stats().clients, "ghost sweep done");
            }
        }
    }
    info!("ghost reaper stopped");
}
