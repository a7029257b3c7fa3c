//! Settings types with compiled defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TramoSettings {
    /// Network listener and per-connection transport settings.
    pub server: ServerSettings,
    /// Broker timing and identity settings.
    pub broker: BrokerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl TramoSettings {
    /// Reject values the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("server.heartbeatIntervalSecs", self.server.heartbeat_interval_secs),
            ("server.heartbeatTimeoutSecs", self.server.heartbeat_timeout_secs),
            ("broker.broadcastIntervalSecs", self.broker.broadcast_interval_secs),
            ("broker.reaperIntervalSecs", self.broker.reaper_interval_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
            }
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be > 0".into(),
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host is empty".into()));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Seconds between server-initiated ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence after a missed ping before the connection is closed.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 20,
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerSettings {
    /// Ping interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pong timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Broker timing and client identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Seconds between scheduled roadworks advisories.
    pub broadcast_interval_secs: u64,
    /// Seconds between ghost sweeps.
    pub reaper_interval_secs: u64,
    /// Seconds a client may stay disconnected before it is evicted.
    pub ghost_threshold_secs: u64,
    /// How a connection maps to a client record.
    pub identity: IdentityMode,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            broadcast_interval_secs: 10,
            reaper_interval_secs: 30,
            ghost_threshold_secs: 60,
            identity: IdentityMode::default(),
        }
    }
}

impl BrokerSettings {
    /// Scheduled advisory interval.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    /// Ghost sweep interval.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Disconnection age after which a record is a ghost.
    pub fn ghost_threshold(&self) -> Duration {
        Duration::from_secs(self.ghost_threshold_secs)
    }
}

/// Client identity policy.
///
/// `AddressPort` keys a record by the peer's full socket address, so every
/// connection is a distinct client. `Address` keys by IP only, which lets a
/// client reconnecting from a new ephemeral port pick up its backlog, at the
/// cost of merging every connection from the same host into one record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Peer IP address and port.
    #[default]
    AddressPort,
    /// Peer IP address only.
    Address,
}

impl IdentityMode {
    /// Stable string form used in settings files and env vars.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddressPort => "address_port",
            Self::Address => "address",
        }
    }
}

impl fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "address_port" | "address-port" => Ok(Self::AddressPort),
            "address" => Ok(Self::Address),
            other => Err(SettingsError::InvalidValue(format!(
                "unknown identity mode '{other}'"
            ))),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
