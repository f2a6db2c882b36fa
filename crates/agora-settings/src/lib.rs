//! # agora-settings
//!
//! Layered configuration for Agora.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AgoraSettings::default()`]
//! 2. **User file**: `~/.agora/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `AGORA_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{agora_home, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<AgoraSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static AgoraSettings {
    SETTINGS.get_or_init(|| match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            AgoraSettings::default()
        }
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: AgoraSettings) -> std::result::Result<(), AgoraSettings> {
    SETTINGS.set(settings)
}
