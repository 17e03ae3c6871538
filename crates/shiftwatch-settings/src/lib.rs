//! # shiftwatch-settings
//!
//! Layered configuration for the shiftwatch service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **User file**: `~/.shiftwatch/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SHIFTWATCH_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides_from, deep_merge, load_settings_with, settings_path};
pub use types::{LivenessSettings, LoggingSettings, ServerSettings, Settings, StorageSettings};
