//! Settings schema.
//!
//! Every section uses camelCase keys and falls back to its [`Default`]
//! for anything the file or environment leaves out.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarionetteSettings {
    /// Version reported to clients.
    pub version: String,
    /// HTTP and WebSocket listener.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Page authentication.
    pub auth: AuthSettings,
    /// View files served for page routes.
    pub views: ViewSettings,
    /// Data backend and download scratch space.
    pub storage: StorageSettings,
    /// Registered model and results formats.
    pub formats: FormatSettings,
}

impl Default for MarionetteSettings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").into(),
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
            auth: AuthSettings::default(),
            views: ViewSettings::default(),
            storage: StorageSettings::default(),
            formats: FormatSettings::default(),
        }
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a client is dropped.
    pub pong_timeout_secs: u64,
    /// Outbound frames buffered per connection.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 90,
            outbound_queue: 256,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Which authentication service guards the application view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Everyone is authorized.
    #[default]
    None,
    /// A session cookie is validated against a token endpoint.
    Token,
}

/// Page authentication settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Active service.
    pub mode: AuthMode,
    /// Cookie holding the session token.
    pub cookie_name: String,
    /// Endpoint that validates tokens (`token` mode only).
    pub token_endpoint: Option<String>,
    /// Redirect for unauthenticated visitors.
    pub failure_redirect: String,
    /// Redirect used when the auth service cannot be initialized.
    pub fallback_redirect: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            cookie_name: "SESSIONID".into(),
            token_endpoint: None,
            failure_redirect: "/login".into(),
            fallback_redirect: "https://www.example.org".into(),
        }
    }
}

/// View settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewSettings {
    /// Directory holding `<view>.html` files.
    pub dir: PathBuf,
    /// View served to authorized visitors.
    pub app: String,
    /// View served at `/`.
    pub dashboard: String,
    /// Suites reachable under `/tests/{suite}`.
    pub test_suites: Vec<String>,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("web"),
            app: "app".into(),
            dashboard: "dashboard".into(),
            test_suites: ["core", "persistence", "simulation", "all"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Data backend settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Accept saves. When off, mutating operations are refused.
    pub persistent: bool,
    /// Project documents loaded at startup.
    pub seed_projects: Vec<PathBuf>,
    /// Root of the per-connection download scratch space.
    pub archive_dir: PathBuf,
    /// Directory clients may read through `file://` URLs. Unset refuses
    /// them.
    pub file_root: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            persistent: false,
            seed_projects: Vec::new(),
            archive_dir: std::env::temp_dir().join("marionette"),
            file_root: None,
        }
    }
}

/// Registered format names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatSettings {
    /// Model export formats.
    pub model: Vec<String>,
    /// Results formats.
    pub results: Vec<String>,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            model: ["NeuroML", "LEMS", "SBML", "NEURON"].map(String::from).to_vec(),
            results: ["HDF5", "RECORDING"].map(String::from).to_vec(),
        }
    }
}
