//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::broker::BrokerStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Client records with a live connection.
    pub connections: usize,
    /// Known client records, connected or not.
    pub clients: usize,
    /// Buffered advisories across all clients.
    pub pending_messages: usize,
    /// Open zones.
    pub open_zones: usize,
    /// Closed zones.
    pub closed_zones: usize,
}

/// Build a health response from broker counters.
pub fn health_check(start_time: Instant, stats: BrokerStats) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connected,
        clients: stats.clients,
        pending_messages: stats.pending,
        open_zones: stats.open_zones,
        closed_zones: stats.closed_zones,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), BrokerStats::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, BrokerStats::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counters_tracked() {
        let stats = BrokerStats {
            clients: 4,
            connected: 3,
            pending: 7,
            open_zones: 2,
            closed_zones: 1,
        };
        let json = serde_json::to_value(health_check(Instant::now(), stats)).unwrap();
        assert_eq!(json["connections"], 3);
        assert_eq!(json["clients"], 4);
        assert_eq!(json["pending_messages"], 7);
        assert_eq!(json["open_zones"], 2);
        assert_eq!(json["closed_zones"], 1);
    }
}
