//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Commands handled total (counter, labels: command).
pub const COMMANDS_TOTAL: &str = "broker_commands_total";
/// Rejected client messages total (counter, labels: code).
pub const ERRORS_TOTAL: &str = "broker_errors_total";
/// Advisories handed to live connections (counter).
pub const ADVISORIES_DELIVERED_TOTAL: &str = "broker_advisories_delivered_total";
/// Advisories appended to a backlog (counter).
pub const ADVISORIES_BUFFERED_TOTAL: &str = "broker_advisories_buffered_total";
/// Backlogged advisories replayed on reconnect or broadcast (counter).
pub const ADVISORIES_REPLAYED_TOTAL: &str = "broker_advisories_replayed_total";
/// Messages a writer failed to deliver and put back in a backlog (counter).
pub const ADVISORIES_REQUEUED_TOTAL: &str = "broker_advisories_requeued_total";
/// Ghost records evicted total (counter).
pub const GHOSTS_EVICTED_TOTAL: &str = "broker_ghosts_evicted_total";
/// Zones marked open by command (counter).
pub const ZONES_OPENED_TOTAL: &str = "broker_zones_opened_total";
/// Zones moved from open to closed (counter).
pub const ZONES_CLOSED_TOTAL: &str = "broker_zones_closed_total";
/// Known client records (gauge).
pub const CLIENTS: &str = "broker_clients";
