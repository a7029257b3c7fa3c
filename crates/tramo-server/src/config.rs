//! Server configuration.

use std::time::Duration;

use tramo_settings::{IdentityMode, TramoSettings};

/// Runtime configuration for [`TramoServer`](crate::server::TramoServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after a missed ping before the connection is dropped.
    pub heartbeat_timeout: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval of the scheduled roadworks advisory.
    pub broadcast_interval: Duration,
    /// Interval between ghost sweeps.
    pub reaper_interval: Duration,
    /// How long a disconnected client is kept.
    pub ghost_threshold: Duration,
    /// How peers map to client records.
    pub identity: IdentityMode,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &TramoSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            heartbeat_interval: settings.server.heartbeat_interval(),
            heartbeat_timeout: settings.server.heartbeat_timeout(),
            max_message_size: settings.server.max_message_size,
            broadcast_interval: settings.broker.broadcast_interval(),
            reaper_interval: settings.broker.reaper_interval(),
            ghost_threshold: settings.broker.ghost_threshold(),
            identity: settings.broker.identity,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            ..Self::from_settings(&TramoSettings::default())
        }
    }
}
