//! # tramo-server
//!
//! The route-advisory broker and its Axum HTTP + `WebSocket` front end.
//!
//! - Broker: zone store, client registry with per-client backlog, advisory
//!   fan-out, ghost eviction, all behind one lock
//! - `WebSocket` gateway: first-message command/route dispatch, writer task
//!   with heartbeat, undelivered-message requeue
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use broker::{BroadcastReport, Broker, BrokerStats, ClientKey};
pub use config::ServerConfig;
pub use server::TramoServer;
