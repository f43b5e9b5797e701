//! # wc-settings
//!
//! Configuration for the dapp session bridge, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **User file**: `~/.wcbridge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WCB_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
