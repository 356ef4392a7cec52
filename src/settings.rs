//! Client settings and their persistence.
//!
//! Settings live in a TOML file at:
//! - Linux: ~/.config/edgesight/settings.toml
//! - macOS: ~/Library/Application Support/edgesight/settings.toml
//! - Windows: %APPDATA%\edgesight\settings.toml
//!
//! The core only talks to persistence through [`SettingsStore`], so embedders
//! can swap the TOML file for whatever storage their platform provides.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;

use crate::error::{ConfigurationError, EdgeSightError, Result};

/// Which rules apply to the server URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    /// Plain `ws://` is accepted (local device on the bench)
    Development,
    /// Only `wss://` is accepted
    Production,
}

impl BuildProfile {
    /// Profile of the running binary (debug builds count as development)
    pub fn current() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

/// A server URL that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    secure: bool,
}

impl Endpoint {
    /// Validate a scheme-qualified URL for the given build profile.
    pub fn parse(url: &str, profile: BuildProfile) -> std::result::Result<Self, ConfigurationError> {
        let url = url.trim();
        let secure = if url.starts_with("wss://") {
            true
        } else if url.starts_with("ws://") {
            false
        } else {
            return Err(ConfigurationError::UnsupportedScheme {
                url: url.to_string(),
            });
        };

        if !secure && profile == BuildProfile::Production {
            return Err(ConfigurationError::InsecureScheme {
                url: url.to_string(),
            });
        }

        let uri = url
            .parse::<Uri>()
            .map_err(|e| ConfigurationError::InvalidUrl {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if uri.host().map_or(true, str::is_empty) {
            return Err(ConfigurationError::InvalidUrl {
                url: url.to_string(),
                message: "missing host".to_string(),
            });
        }

        Ok(Self {
            url: url.to_string(),
            secure,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Persisted client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Perception device address (`ws://` or `wss://`)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Objects below this confidence are hidden from display
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Whether depth labels are drawn on the overlay
    #[serde(default = "default_show_depth_overlay")]
    pub show_depth_overlay: bool,

    /// Upper bound on a single connection attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Drop the object set if no batch arrived for this long (0 = never)
    #[serde(default)]
    pub stale_after_ms: u64,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_url() -> String {
    match BuildProfile::current() {
        BuildProfile::Development => "ws://192.168.1.100:8765".to_string(),
        BuildProfile::Production => "wss://192.168.1.100:8765".to_string(),
    }
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_show_depth_overlay() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            confidence_threshold: default_confidence_threshold(),
            show_depth_overlay: default_show_depth_overlay(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stale_after_ms: 0,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Check every field and return the validated endpoint.
    pub fn validate(&self, profile: BuildProfile) -> std::result::Result<Endpoint, ConfigurationError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigurationError::ThresholdOutOfRange {
                value: self.confidence_threshold,
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "connect_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigurationError::InvalidValue {
                key: "log_level".to_string(),
                message: format!("must be one of: {}", LOG_LEVELS.join(", ")),
            });
        }
        Endpoint::parse(&self.server_url, profile)
    }

    /// Get a setting by key
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "server_url" => Some(self.server_url.clone()),
            "confidence_threshold" => Some(self.confidence_threshold.to_string()),
            "show_depth_overlay" => Some(self.show_depth_overlay.to_string()),
            "connect_timeout_ms" => Some(self.connect_timeout_ms.to_string()),
            "stale_after_ms" => Some(self.stale_after_ms.to_string()),
            "log_level" => Some(self.log_level.clone()),
            _ => None,
        }
    }

    /// Set a setting by key. Values are parsed here; cross-field checks
    /// happen in [`Settings::validate`].
    pub fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), ConfigurationError> {
        let invalid = |message: String| ConfigurationError::InvalidValue {
            key: key.to_string(),
            message,
        };
        match key {
            "server_url" => self.server_url = value.trim().to_string(),
            "confidence_threshold" => {
                self.confidence_threshold = value
                    .parse::<f64>()
                    .map_err(|e| invalid(e.to_string()))?;
            }
            "show_depth_overlay" => {
                self.show_depth_overlay = value
                    .parse::<bool>()
                    .map_err(|e| invalid(e.to_string()))?;
            }
            "connect_timeout_ms" => {
                self.connect_timeout_ms = value
                    .parse::<u64>()
                    .map_err(|e| invalid(e.to_string()))?;
            }
            "stale_after_ms" => {
                self.stale_after_ms = value
                    .parse::<u64>()
                    .map_err(|e| invalid(e.to_string()))?;
            }
            "log_level" => self.log_level = value.to_string(),
            _ => {
                return Err(ConfigurationError::UnknownKey {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Display settings as formatted text
    pub fn display(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("server_url = \"{}\"\n", self.server_url));
        output.push_str(&format!(
            "confidence_threshold = {}\n",
            self.confidence_threshold
        ));
        output.push_str(&format!("show_depth_overlay = {}\n", self.show_depth_overlay));
        output.push_str(&format!("connect_timeout_ms = {}\n", self.connect_timeout_ms));
        if self.stale_after_ms == 0 {
            output.push_str("stale_after_ms = 0 # never expire\n");
        } else {
            output.push_str(&format!("stale_after_ms = {}\n", self.stale_after_ms));
        }
        output.push_str(&format!("log_level = \"{}\"\n", self.log_level));
        output
    }
}

/// Persistence collaborator for [`Settings`]
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings>;
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// Load settings, falling back to defaults when the store fails.
pub fn load_settings_or_default(store: &dyn SettingsStore) -> Settings {
    match store.load() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

/// TOML file store
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config directory
    pub fn at_default_path() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("edgesight").join("settings.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(path: &Path, message: impl ToString) -> EdgeSightError {
        EdgeSightError::Storage {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| Self::storage_error(&self.path, e))?;

        toml::from_str(&content)
            .map_err(|e| Self::storage_error(&self.path, format!("Failed to parse settings: {}", e)))
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::storage_error(parent, e))?;
        }

        let content = toml::to_string_pretty(settings).map_err(|e| {
            Self::storage_error(&self.path, format!("Failed to serialize settings: {}", e))
        })?;

        // Atomic write
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &content).map_err(|e| Self::storage_error(&temp_path, e))?;
        replace_file(&temp_path, &self.path).map_err(|e| Self::storage_error(&self.path, e))?;

        tracing::debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

/// Rename `src` over `dst`. Windows refuses to rename onto an existing file.
fn replace_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    {
        if dst.exists() {
            fs::remove_file(dst)?;
        }
    }
    fs::rename(src, dst)
}

/// In-memory store, for embedders without a filesystem and for tests
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    saved: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            saved: Mutex::new(Some(settings)),
        }
    }

    /// Last saved value, if any
    pub fn saved(&self) -> Option<Settings> {
        self.saved.lock().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings> {
        Ok(self.saved.lock().clone().unwrap_or_default())
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        *self.saved.lock() = Some(settings.clone());
        Ok(())
    }
}
