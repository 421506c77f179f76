use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// SQLite database file at `endpoint`, created on first use.
    EmbeddedFile,
    /// SQLite `:memory:` database; SQL-backed but gone when the ledger is dropped.
    InMemory,
    Postgres,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::EmbeddedFile => write!(f, "embedded_file"),
            DriverKind::InMemory => write!(f, "in_memory"),
            DriverKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Connection parameters for a durable persistence backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub driver: DriverKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    1
}

#[derive(Deserialize)]
struct ConfigFile {
    persistence: ConnectionOptions,
}

impl ConnectionOptions {
    pub fn new(driver: DriverKind, endpoint: &str, username: &str, password: &str) -> Self {
        ConnectionOptions {
            driver,
            endpoint: endpoint.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            busy_timeout_ms: default_timeout_ms(),
            acquire_timeout_ms: default_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }

    pub fn embedded_file(path: impl AsRef<Path>) -> Self {
        Self::new(DriverKind::EmbeddedFile, &path.as_ref().to_string_lossy(), "", "")
    }

    pub fn in_memory() -> Self {
        Self::new(DriverKind::InMemory, "", "", "")
    }

    /// Accepts either a bare options table or one nested under `[persistence]`.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(source).map_err(config_error)?;
        let options = if value.get("persistence").is_some() {
            value.try_into::<ConfigFile>().map(|f| f.persistence)
        } else {
            value.try_into::<ConnectionOptions>()
        };
        options.map_err(config_error)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }
}

fn config_error(err: impl fmt::Display) -> LedgerError {
    LedgerError::Configuration(err.to_string())
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("driver", &self.driver)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
