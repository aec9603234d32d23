//! Configuration system for powd.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $POWD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/powd/config.toml
//!   3. ~/.config/powd/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PowdConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub clients: ClientsConfig,
    pub store: StoreConfig,
    pub maintenance: MaintenanceConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the server's X25519 private key. Auto-generated on first use.
    pub keypair_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address the custom-command listener binds to.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientsConfig {
    /// Client list file. One hex public key per line, `#` starts a comment.
    pub list_path: PathBuf,
    /// Additional client public keys (hex) accepted on top of the list file.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding proof-of-work tasks.
    pub path: PathBuf,
    /// How long a store operation waits on a locked database.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Delay before incomplete tasks from a previous run are re-submitted.
    pub startup_delay_secs: u64,
    /// Delay before the first cleanup pass.
    pub cleanup_first_delay_secs: u64,
    /// Interval between cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Tasks older than this are deleted, complete or not.
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// External program computing nonces. Invoked as
    /// `<command> <args..> <initial_hash hex> <target hex>`, prints the nonce as hex.
    pub command: String,
    pub args: Vec<String>,
    /// Max concurrent computations. 0 = available parallelism.
    pub max_concurrent: u32,
    pub work_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DAY_SECS: u64 = 24 * 60 * 60;

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keypair_path: config_dir().join("identity.key"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8444".to_string(),
        }
    }
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            list_path: config_dir().join("clients.conf"),
            keys: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("tasks.sqlite"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 15,
            cleanup_first_delay_secs: 60,
            cleanup_interval_secs: DAY_SECS,
            retention_secs: 7 * DAY_SECS,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "powd-engine".to_string(),
            args: Vec::new(),
            max_concurrent: 0,
            work_dir: std::env::temp_dir().join("powd-engine"),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("powd")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("powd")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PowdConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PowdConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("POWD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PowdConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply POWD_* overrides. `lookup` is `std::env::var` in production.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("POWD_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = lookup("POWD_STORE__PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("POWD_CLIENTS__LIST_PATH") {
            self.clients.list_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("POWD_ENGINE__COMMAND") {
            self.engine.command = v;
        }
        if let Some(v) = lookup("POWD_MAINTENANCE__STARTUP_DELAY_SECS") {
            if let Ok(secs) = v.parse() {
                self.maintenance.startup_delay_secs = secs;
            }
        }
        if let Some(v) = lookup("POWD_MAINTENANCE__RETENTION_SECS") {
            if let Ok(secs) = v.parse() {
                self.maintenance.retention_secs = secs;
            }
        }
    }
}
