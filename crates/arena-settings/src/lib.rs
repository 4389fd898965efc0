//! # arena-settings
//!
//! Configuration for the arena server, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`ArenaSettings::default()`]
//! 2. **Settings file**: `$ARENA_HOME/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `ARENA_*` overrides (highest priority)
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_with, arena_home, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
