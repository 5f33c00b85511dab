//! # gamehub-settings
//!
//! Configuration for the gamehub server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `~/.gamehub/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PORT` and `GAMEHUB_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with, settings_path,
};
pub use types::{HubSettings, LoggingSettings, ServerSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = HubSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = HubSettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }
}
