//! Configuration for the warehouse connection and the operation catalog.
//!
//! Stored as TOML at `~/.config/olap-explorer/config.toml` (or the XDG
//! equivalent). A missing file yields the defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! [warehouse]
//! path = "/srv/imdb/warehouse.db"
//! schema = "dwh"
//! max_connections = 4
//! acquire_timeout_ms = 5000
//!
//! [operations]
//! slice_genre = "drama"
//! dice_genre = "comedy"
//! dice_region = "us"
//! dice_min_year = 2015
//! dice_limit = 20
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::olap::OperationDefaults;
use crate::olap::schema::is_identifier;

pub const ENV_WAREHOUSE_PATH: &str = "OLAP_WAREHOUSE_PATH";
pub const ENV_SCHEMA: &str = "OLAP_SCHEMA";
pub const ENV_MAX_CONNECTIONS: &str = "OLAP_MAX_CONNECTIONS";

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OlapConfig {
    pub warehouse: WarehouseConfig,
    pub operations: OperationDefaults,
}

/// Where the warehouse lives and how many connections may be open at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// SQLite database holding the star schema.
    pub path: PathBuf,
    /// Name the database is attached under; queries qualify tables with it.
    pub schema: String,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warehouse.db"),
            schema: "dwh".into(),
            max_connections: 4,
            acquire_timeout_ms: 5000,
        }
    }
}

impl WarehouseConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.schema) {
            return Err(ConfigError::Validation(format!(
                "warehouse.schema '{}' is not a valid identifier",
                self.schema
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "warehouse.max_connections must be at least 1".into(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "warehouse.acquire_timeout_ms must be positive".into(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("warehouse.path is empty".into()));
        }
        Ok(())
    }
}

impl OlapConfig {
    /// Load configuration from the default location, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    ///
    /// - Primary: `$XDG_CONFIG_HOME/olap-explorer/config.toml`
    /// - Fallback: platform config dir (e.g. `~/.config/olap-explorer/config.toml`)
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config)
                .join("olap-explorer")
                .join("config.toml"));
        }

        dirs::config_dir()
            .map(|p| p.join("olap-explorer").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Apply `OLAP_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup(ENV_WAREHOUSE_PATH).filter(|v| !v.trim().is_empty()) {
            self.warehouse.path = PathBuf::from(path);
        }
        if let Some(schema) = lookup(ENV_SCHEMA).filter(|v| !v.trim().is_empty()) {
            self.warehouse.schema = schema.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_MAX_CONNECTIONS) {
            self.warehouse.max_connections = raw.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("{ENV_MAX_CONNECTIONS}='{raw}' is not a number"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.warehouse.validate()?;
        let ops = &self.operations;
        for (name, value) in [
            ("slice_genre", &ops.slice_genre),
            ("dice_genre", &ops.dice_genre),
            ("dice_region", &ops.dice_region),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "operations.{name} must not be empty"
                )));
            }
        }
        if ops.dice_limit == 0 {
            return Err(ConfigError::Validation(
                "operations.dice_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
