//! # tramo-core
//!
//! Foundation types for the Tramo route-advisory broker.
//!
//! This crate provides the shared vocabulary the server and binary depend on:
//!
//! - **Zones**: [`ZoneName`] newtype plus the route grammar ([`validate`], [`parse_route`])
//! - **Advisories**: [`TrafficAdvisory`], the flat JSON payload pushed to clients
//! - **Errors**: [`BrokerError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod advisory;
pub mod errors;
pub mod logging;
pub mod zone;

pub use advisory::TrafficAdvisory;
pub use errors::{BrokerError, Result};
pub use zone::{ZoneName, parse_route, validate};
