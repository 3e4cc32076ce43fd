use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TesseraConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Days of `request_log` kept at startup. 0 keeps everything.
    pub request_log_days: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Oldest protocol version string a client may negotiate. Compared lexicographically.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4747,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_tessera_dir()
            .join("tessera.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            request_log_days: 30,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: crate::protocol::PROTOCOL_VERSION.into(),
        }
    }
}

/// Returns `~/.tessera/`, falling back to the working directory when there is no home.
pub fn default_tessera_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tessera")
}

/// Returns the default config file path: `~/.tessera/config.toml`
pub fn default_config_path() -> PathBuf {
    default_tessera_dir().join("config.toml")
}

impl TesseraConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TesseraConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (TESSERA_DB, TESSERA_LOG_LEVEL, TESSERA_PORT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TESSERA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("TESSERA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("TESSERA_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid TESSERA_PORT"),
            }
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
