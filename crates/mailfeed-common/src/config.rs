//! Configuration for mailfeed

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "MAILFEED_CONFIG";

/// Prefix for environment overrides, e.g. `MAILFEED__SMTP__PORT=2525`
pub const ENV_PREFIX: &str = "MAILFEED";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Feed storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database configuration (relational storage backend)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Web UI configuration
    #[serde(default)]
    pub web: WebConfig,

    /// Feed document configuration
    #[serde(default)]
    pub feed: FeedConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public hostname. Inbox addresses are `<token>@<hostname>` and feeds
    /// are served from `https://<hostname>/feeds/`.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Home page linked from every feed, defaults to `https://<hostname>/`
    pub home_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            home_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL of the web front end, always ending in `/`
    pub fn home_url(&self) -> String {
        match &self.home_url {
            Some(url) if url.ends_with('/') => url.clone(),
            Some(url) => format!("{}/", url),
            None => format!("https://{}/", self.hostname),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Feed storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "fs" (one Atom document per inbox) or "sqlite"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Base path for the document store
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_backend() -> String {
    "fs".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/mailfeed.db")
}

fn default_max_connections() -> u32 {
    8
}

fn default_min_connections() -> u32 {
    1
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Bind host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// SMTP port (inbound)
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum recipients per message
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Maximum concurrent connections
    #[serde(default = "default_smtp_max_connections")]
    pub max_connections: usize,

    /// Idle timeout per command in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            max_message_size: default_max_message_size(),
            max_recipients: default_max_recipients(),
            max_connections: default_smtp_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "0.0.0.0".to_string()
}

fn default_smtp_port() -> u16 {
    2525
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024 // 25 MB
}

fn default_max_recipients() -> usize {
    100
}

fn default_smtp_max_connections() -> usize {
    100
}

fn default_connection_timeout() -> u64 {
    300
}

/// Web UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Enable Web UI
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,

    /// Web UI server bind address
    #[serde(default = "default_web_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            bind: default_web_bind(),
        }
    }
}

fn default_web_enabled() -> bool {
    true
}

fn default_web_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// Feed document configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Maximum serialized size of one feed document in bytes
    #[serde(default = "default_max_feed_bytes")]
    pub max_bytes: usize,

    /// Length of generated inbox and entry tokens
    #[serde(default = "default_token_length")]
    pub token_length: usize,

    /// Namespace used in `urn:<namespace>:<token>` identifiers
    #[serde(default = "default_urn_namespace")]
    pub urn_namespace: String,

    /// Human readable service name used in subtitles and welcome entries
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Start every new feed with an "inbox created" entry
    #[serde(default = "default_welcome_entry")]
    pub welcome_entry: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_feed_bytes(),
            token_length: default_token_length(),
            urn_namespace: default_urn_namespace(),
            service_name: default_service_name(),
            welcome_entry: default_welcome_entry(),
        }
    }
}

fn default_max_feed_bytes() -> usize {
    500_000
}

fn default_token_length() -> usize {
    20
}

fn default_urn_namespace() -> String {
    "mailfeed".to_string()
}

fn default_service_name() -> String {
    "mailfeed".to_string()
}

fn default_welcome_entry() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the first config file found (if any), then
    /// apply `MAILFEED__SECTION__KEY` environment overrides
    pub fn load() -> crate::Result<Self> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("./mailfeed.toml"));
        paths.push(PathBuf::from("/etc/mailfeed/config.toml"));

        let mut builder = config::Config::builder();
        if let Some(path) = paths.iter().find(|p| p.exists()) {
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.hostname.trim().is_empty() {
            return Err(crate::Error::Config("server.hostname must not be empty".to_string()));
        }
        if self.server.hostname.contains('@') {
            return Err(crate::Error::Config(
                "server.hostname must not contain '@'".to_string(),
            ));
        }
        if self.feed.max_bytes == 0 {
            return Err(crate::Error::Config("feed.max_bytes must be positive".to_string()));
        }
        if self.feed.token_length < 8 {
            return Err(crate::Error::Config(
                "feed.token_length must be at least 8".to_string(),
            ));
        }
        match self.storage.backend.as_str() {
            "fs" | "sqlite" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "Unsupported storage backend: {}",
                    other
                )))
            }
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(crate::Error::Config(format!("Unsupported log format: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.hostname, "localhost");
        assert_eq!(config.server.home_url(), "https://localhost/");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.feed.max_bytes, 500_000);
        assert_eq!(config.feed.token_length, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "feeds.example.com"
home_url = "https://www.example.com"

[storage]
backend = "sqlite"

[database]
path = "/var/lib/mailfeed/mailfeed.db"

[smtp]
port = 25

[feed]
max_bytes = 100000
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "feeds.example.com");
        assert_eq!(config.server.home_url(), "https://www.example.com/");
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.smtp.max_recipients, 100);
        assert_eq!(config.feed.max_bytes, 100_000);
        assert_eq!(config.feed.urn_namespace, "mailfeed");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.storage.backend = "s3".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.hostname = "user@host".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feed.token_length = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feed.max_bytes = 0;
        assert!(config.validate().is_err());
    }
}
