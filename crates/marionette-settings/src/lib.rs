//! # marionette-settings
//!
//! Layered configuration for the Marionette server: compiled defaults, a
//! JSON settings file, and `MARIONETTE_*` environment overrides, merged
//! with `figment`.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{ENV_PREFIX, env_key_path, load_settings, load_settings_from_path, settings_path};
pub use types::*;
