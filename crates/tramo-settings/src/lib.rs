//! # tramo-settings
//!
//! Configuration for the Tramo broker, loaded from three layers (in priority
//! order, lowest first):
//! 1. **Compiled defaults**: [`TramoSettings::default()`]
//! 2. **Settings file**: `~/.tramo/settings.json` or `$TRAMO_SETTINGS`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `TRAMO_*` overrides
//!
//! The binary applies `--host`/`--port` on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{BrokerSettings, IdentityMode, LoggingSettings, ServerSettings, TramoSettings};
