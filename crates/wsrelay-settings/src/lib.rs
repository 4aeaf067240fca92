//! # wsrelay-settings
//!
//! Layered configuration for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.wsrelay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WSRELAY_*` overrides (highest priority)
//!
//! Command-line flags, applied by the binary, sit above all three.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path, load_with_env, settings_path, validate,
};
pub use types::{LoggingSettings, RelaySettings, ServerSettings};
pub use wsrelay_core::RelayConfig;
