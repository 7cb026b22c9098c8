//! Settings loading.
//!
//! Layers, lowest priority first:
//! 1. Compiled [`MarionetteSettings::default()`]
//! 2. `~/.marionette/settings.json` (or an explicit path)
//! 3. `MARIONETTE_*` environment variables
//!
//! Environment keys use `__` between sections and `_` between words, so
//! `MARIONETTE_SERVER__MAX_MESSAGE_SIZE` sets `server.maxMessageSize`.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::MarionetteSettings;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MARIONETTE_";

/// Resolve the default settings file (`~/.marionette/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".marionette").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<MarionetteSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides.
///
/// A missing file is not an error. Malformed JSON or values of the wrong
/// type are.
pub fn load_settings_from_path(path: &Path) -> Result<MarionetteSettings> {
    debug!(?path, exists = path.exists(), "loading settings");
    let settings: MarionetteSettings = Figment::from(Serialized::defaults(
        MarionetteSettings::default(),
    ))
    .merge(Json::file(path))
    .merge(env_provider())
    .extract()?;
    validate(&settings)?;
    Ok(settings)
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
        .lowercase(false)
        .map(|key| env_key_path(key.as_str()).into())
}

/// Translate an env key (prefix stripped) into a dotted settings path.
pub fn env_key_path(raw: &str) -> String {
    raw.split("__")
        .map(camel_case)
        .collect::<Vec<_>>()
        .join(".")
}

fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
        let word = word.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&word);
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

fn validate(settings: &MarionetteSettings) -> Result<()> {
    if settings.server.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundQueue must be at least 1".into(),
        ));
    }
    if settings.server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if settings.server.pong_timeout_secs < settings.server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(
            "server.pongTimeoutSecs must not be shorter than the heartbeat interval".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthMode;
    use figment::Jail;

    fn load(path: &str) -> figment::error::Result<MarionetteSettings> {
        load_settings_from_path(Path::new(path)).map_err(|e| e.to_string().into())
    }

    #[test]
    fn env_keys_become_camel_case_paths() {
        assert_eq!(env_key_path("SERVER__MAX_MESSAGE_SIZE"), "server.maxMessageSize");
        assert_eq!(env_key_path("LOGGING__LEVEL"), "logging.level");
        assert_eq!(env_key_path("VERSION"), "version");
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let settings = load("absent.json")?;
            assert_eq!(settings, MarionetteSettings::default());
            Ok(())
        });
    }

    #[test]
    fn file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{"server": {"port": 9100}, "auth": {"mode": "token", "tokenEndpoint": "http://auth/check"}}"#,
            )?;
            let settings = load("settings.json")?;
            assert_eq!(settings.server.port, 9100);
            assert_eq!(settings.server.host, "127.0.0.1");
            assert_eq!(settings.auth.mode, AuthMode::Token);
            assert_eq!(settings.auth.token_endpoint.as_deref(), Some("http://auth/check"));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", r#"{"server": {"port": 9100}}"#)?;
            jail.set_env("MARIONETTE_SERVER__PORT", "9200");
            jail.set_env("MARIONETTE_SERVER__MAX_MESSAGE_SIZE", "1024");
            jail.set_env("MARIONETTE_STORAGE__PERSISTENT", "true");
            let settings = load("settings.json")?;
            assert_eq!(settings.server.port, 9200);
            assert_eq!(settings.server.max_message_size, 1024);
            assert!(settings.storage.persistent);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", "{not json")?;
            assert!(load_settings_from_path(Path::new("settings.json")).is_err());
            Ok(())
        });
    }

    #[test]
    fn inconsistent_heartbeat_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{"server": {"heartbeatIntervalSecs": 60, "pongTimeoutSecs": 10}}"#,
            )?;
            let err = load_settings_from_path(Path::new("settings.json")).unwrap_err();
            assert!(matches!(err, SettingsError::InvalidValue(_)));
            Ok(())
        });
    }
}
