//! Ping cadence and liveness checks.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::config::ServerConfig;

use super::connection::ClientConnection;

/// Verdict of one heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Activity since the previous check, or still within the timeout.
    Alive,
    /// Missed a cycle and silent for longer than the timeout.
    Unresponsive,
}

/// Ping cadence for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between pings.
    pub interval: Duration,
    /// Silence tolerated once a cycle has been missed.
    pub timeout: Duration,
}

impl Heartbeat {
    /// Heartbeat settings from the server config.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            timeout: config.heartbeat_timeout,
        }
    }

    /// Ping ticker. The first tick fires one `interval` from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Judge `connection` at a ping tick. Consumes its alive flag, so each
    /// inbound frame counts for one cycle.
    pub fn check(&self, connection: &ClientConnection) -> Liveness {
        if connection.check_alive() || connection.last_activity_elapsed() <= self.timeout {
            Liveness::Alive
        } else {
            Liveness::Unresponsive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection() -> (ClientConnection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = "127.0.0.1:40000".parse().unwrap();
        (ClientConnection::with_id("hb_conn".into(), peer, tx), rx)
    }

    fn heartbeat(interval_secs: u64, timeout_secs: u64) -> Heartbeat {
        Heartbeat {
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out_after_missed_cycle() {
        let (conn, _rx) = make_connection();
        let hb = heartbeat(20, 20);
        let mut ticker = hb.ticker();

        // The connect itself counts as activity for the first cycle.
        let _ = ticker.tick().await;
        assert_eq!(hb.check(&conn), Liveness::Alive);

        let _ = ticker.tick().await;
        assert_eq!(hb.check(&conn), Liveness::Unresponsive);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_longer_than_interval_allows_missed_cycles() {
        let (conn, _rx) = make_connection();
        let hb = heartbeat(10, 25);
        let mut ticker = hb.ticker();

        let mut verdicts = Vec::new();
        for _ in 0..3 {
            let _ = ticker.tick().await;
            verdicts.push(hb.check(&conn));
        }
        assert_eq!(
            verdicts,
            [Liveness::Alive, Liveness::Alive, Liveness::Unresponsive]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_connection_alive() {
        let (conn, _rx) = make_connection();
        let hb = heartbeat(20, 20);
        let mut ticker = hb.ticker();

        for _ in 0..10 {
            time::advance(Duration::from_secs(15)).await;
            conn.mark_alive();
            let _ = ticker.tick().await;
            assert_eq!(hb.check(&conn), Liveness::Alive);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let hb = heartbeat(20, 20);
        let start = Instant::now();
        let mut ticker = hb.ticker();
        let _ = ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn from_config_uses_heartbeat_settings() {
        let config = ServerConfig {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            ..ServerConfig::default()
        };
        assert_eq!(Heartbeat::from_config(&config), heartbeat(5, 15));
    }
}
