//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconnect and retention settings for the notification link
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_max_notifications")]
    pub max_notifications: usize,

    /// Used until the user toggles the sound preference
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_max_reconnect_delay() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_notifications() -> usize {
    50
}

fn default_sound_enabled() -> bool {
    true
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_notifications: default_max_notifications(),
            sound_enabled: default_sound_enabled(),
        }
    }
}

/// Where the notification WebSocket lives
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Explicit override; wins over everything else
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    /// Page served over TLS; selects `wss`
    #[serde(default)]
    pub secure: bool,

    /// Page-embedded meta values, keyed like `app-ws_url`
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_path() -> String {
    "/ws/notifications".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            path: default_path(),
            secure: false,
            meta: HashMap::new(),
        }
    }
}

/// Local durable storage
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("incident-notify").to_string_lossy().to_string())
        .unwrap_or_else(|| "./incident_notify_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// `data_dir` with a leading `~` expanded to the home directory
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir, dirs::home_dir())
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_path().join("session.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_path().join("preferences.json")
    }
}

fn expand_home(path: &str, home: Option<PathBuf>) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match home {
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("incident-notify").join("config.toml")),
            Some(PathBuf::from("./incident-notify.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Endpoint overrides
        if let Some(url) = lookup("INCIDENT_NOTIFY_WS_URL") {
            self.endpoint.url = Some(url);
        }
        if let Some(host) = lookup("INCIDENT_NOTIFY_HOST") {
            self.endpoint.host = host;
        }
        if let Some(port) = lookup("INCIDENT_NOTIFY_PORT") {
            if let Ok(p) = port.parse() {
                self.endpoint.port = p;
            }
        }
        if let Some(secure) = lookup("INCIDENT_NOTIFY_SECURE") {
            if let Ok(s) = secure.parse() {
                self.endpoint.secure = s;
            }
        }

        // Link overrides
        if let Some(attempts) = lookup("INCIDENT_NOTIFY_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(a) = attempts.parse() {
                self.link.max_reconnect_attempts = a;
            }
        }

        // Storage overrides
        if let Some(data_dir) = lookup("INCIDENT_NOTIFY_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        // Logging overrides
        if let Some(level) = lookup("INCIDENT_NOTIFY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("INCIDENT_NOTIFY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# incident-notify configuration
#
# Environment variables override these settings:
# - INCIDENT_NOTIFY_WS_URL
# - INCIDENT_NOTIFY_HOST
# - INCIDENT_NOTIFY_PORT
# - INCIDENT_NOTIFY_SECURE
# - INCIDENT_NOTIFY_MAX_RECONNECT_ATTEMPTS
# - INCIDENT_NOTIFY_DATA_DIR
# - INCIDENT_NOTIFY_LOG_LEVEL
# - INCIDENT_NOTIFY_LOG_FORMAT

[link]
# First reconnect delay (ms)
reconnect_delay_ms = 3000

# Upper bound for the reconnect delay (ms)
max_reconnect_delay_ms = 30000

# Delay growth per failed attempt
backoff_multiplier = 1.5

# Failed attempts before giving up until the next manual start
max_reconnect_attempts = 5

# Notifications kept in memory (oldest evicted first)
max_notifications = 50

# Play a sound for incoming notifications until toggled
sound_enabled = true

[endpoint]
# Explicit WebSocket URL; takes precedence over everything below
# url = "wss://api.example.com/ws/notifications"

host = "localhost"
port = 8081
path = "/ws/notifications"

# Use wss:// for the derived address
secure = false

# Page-embedded meta values (checked after the explicit url)
[endpoint.meta]
# "app-ws_url" = "ws://localhost:8081/ws/notifications"

[storage]
# Session and preference files live here
data_dir = "~/.local/share/incident-notify"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/incident-notify.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.link.reconnect_delay_ms, 3000);
        assert_eq!(config.link.max_reconnect_delay_ms, 30000);
        assert_eq!(config.link.max_reconnect_attempts, 5);
        assert_eq!(config.link.max_notifications, 50);
        assert!(config.link.sound_enabled);
        assert_eq!(config.endpoint.port, 8081);
        assert_eq!(config.endpoint.path, "/ws/notifications");
        assert!(config.endpoint.url.is_none());
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.link.backoff_multiplier, 1.5);
        assert!(!config.storage.session_path().starts_with("~"));
        assert_eq!(config.endpoint.host, "localhost");
        assert!(config.endpoint.meta.is_empty());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
[link]
max_reconnect_attempts = 3

[endpoint]
secure = true

[endpoint.meta]
"app-ws_url" = "wss://meta.example.com/ws"
"#,
        )
        .unwrap();

        assert_eq!(config.link.max_reconnect_attempts, 3);
        assert_eq!(config.link.reconnect_delay_ms, 3000);
        assert!(config.endpoint.secure);
        assert_eq!(
            config.endpoint.meta.get("app-ws_url").map(String::as_str),
            Some("wss://meta.example.com/ws")
        );
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let vars: HashMap<&str, &str> = [
            ("INCIDENT_NOTIFY_WS_URL", "ws://override:9000/ws"),
            ("INCIDENT_NOTIFY_PORT", "9443"),
            ("INCIDENT_NOTIFY_SECURE", "true"),
            ("INCIDENT_NOTIFY_MAX_RECONNECT_ATTEMPTS", "not-a-number"),
            ("INCIDENT_NOTIFY_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint.url.as_deref(), Some("ws://override:9000/ws"));
        assert_eq!(config.endpoint.port, 9443);
        assert!(config.endpoint.secure);
        assert_eq!(config.link.max_reconnect_attempts, 5);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[link\n").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: "/tmp/notify".to_string(),
        };
        assert_eq!(storage.session_path(), PathBuf::from("/tmp/notify/session.json"));
        assert_eq!(
            storage.preferences_path(),
            PathBuf::from("/tmp/notify/preferences.json")
        );
    }

    #[test]
    fn test_home_expansion() {
        let home = Some(PathBuf::from("/home/ana"));
        assert_eq!(
            expand_home("~/.local/share/incident-notify", home.clone()),
            PathBuf::from("/home/ana/.local/share/incident-notify")
        );
        assert_eq!(expand_home("~", home.clone()), PathBuf::from("/home/ana"));
        assert_eq!(expand_home("~other/x", home.clone()), PathBuf::from("~other/x"));
        assert_eq!(expand_home("./data", home), PathBuf::from("./data"));
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }
}
