//! Configuration Management
//!
//! This module loads runtime settings and named database connections.
//!
//! # Configuration Locations
//! - Local: `.askdb/config.json` (team-shareable, per-project)
//! - Global: `~/.config/askdb/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit CLI parameters (`--url`, `--top-k`)
//! 2. Local config file
//! 3. Global config file
//! 4. Built-in defaults
//!
//! # File Format
//! ```json
//! {
//!   "settings": { "max_limit": 500, "generator": { "endpoint": "http://127.0.0.1:8787" } },
//!   "connections": {
//!     "local": { "url": "postgres://localhost/app" },
//!     "prod": { "url_env": "PROD_DATABASE_URL" }
//!   },
//!   "default": "local"
//! }
//! ```
//! Every field is optional. Connection strings can be kept out of files
//! entirely with `url_env`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AskError, Result};
use crate::executor::ExecutionLimits;

/// Longest accepted card cache TTL (30 days)
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Runtime settings consumed by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Age after which a relation card snapshot is rebuilt
    pub cache_ttl_secs: u64,

    /// Per-statement timeout applied to every guarded SELECT
    pub statement_timeout_ms: u64,

    /// Largest LIMIT a statement may carry (and the one appended by default)
    pub max_limit: u64,

    /// Byte budget for the serialized row set
    pub max_response_bytes: usize,

    /// Maximum number of connection pools held at once
    pub pool_capacity: usize,

    /// Maximum connections per pool
    pub pool_max_connections: usize,

    /// Relations passed to the generator when no `--top-k` is given
    pub default_top_k: usize,

    pub generator: GeneratorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            statement_timeout_ms: 15_000,
            max_limit: 1000,
            max_response_bytes: 1_048_576,
            pool_capacity: 16,
            pool_max_connections: 4,
            default_top_k: 6,
            generator: GeneratorSettings::default(),
        }
    }
}

impl Settings {
    /// Reject values that would disable a safety bound
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 7] = [
            ("cache_ttl_secs", self.cache_ttl_secs > 0),
            ("statement_timeout_ms", self.statement_timeout_ms > 0),
            ("max_limit", self.max_limit > 0),
            ("max_response_bytes", self.max_response_bytes > 0),
            ("pool_capacity", self.pool_capacity > 0),
            ("pool_max_connections", self.pool_max_connections > 0),
            ("default_top_k", self.default_top_k > 0),
        ];

        if let Some((field, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(AskError::config_error(format!("{field} must be greater than zero")));
        }

        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(AskError::config_error(format!(
                "cache_ttl_secs must be at most {MAX_CACHE_TTL_SECS}"
            )));
        }

        if self.generator.endpoint.trim().is_empty() {
            return Err(AskError::config_error("generator.endpoint cannot be empty"));
        }
        if self.generator.timeout_ms == 0 {
            return Err(AskError::config_error("generator.timeout_ms must be greater than zero"));
        }

        Ok(())
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub const fn execution_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            max_limit: self.max_limit,
            statement_timeout_ms: self.statement_timeout_ms,
            max_response_bytes: self.max_response_bytes,
        }
    }
}

/// Where and how to reach the SQL generator service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Base URL; requests go to `<endpoint>/sql` and `<endpoint>/explain`
    pub endpoint: String,

    pub timeout_ms: u64,

    /// Environment variable holding a bearer token, if the service needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self { endpoint: "http://127.0.0.1:8787".to_string(), timeout_ms: 30_000, api_key_env: None }
    }
}

/// Settings as written in a config file (every field optional)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverrides {
    pub cache_ttl_secs: Option<u64>,
    pub statement_timeout_ms: Option<u64>,
    pub max_limit: Option<u64>,
    pub max_response_bytes: Option<usize>,
    pub pool_capacity: Option<usize>,
    pub pool_max_connections: Option<usize>,
    pub default_top_k: Option<usize>,
    pub generator: GeneratorOverrides,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOverrides {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub api_key_env: Option<String>,
}

impl SettingsOverrides {
    /// Overwrite every field of `settings` that this file sets
    pub fn apply_to(self, settings: &mut Settings) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut settings.cache_ttl_secs, self.cache_ttl_secs);
        set(&mut settings.statement_timeout_ms, self.statement_timeout_ms);
        set(&mut settings.max_limit, self.max_limit);
        set(&mut settings.max_response_bytes, self.max_response_bytes);
        set(&mut settings.pool_capacity, self.pool_capacity);
        set(&mut settings.pool_max_connections, self.pool_max_connections);
        set(&mut settings.default_top_k, self.default_top_k);
        set(&mut settings.generator.endpoint, self.generator.endpoint);
        set(&mut settings.generator.timeout_ms, self.generator.timeout_ms);
        if self.generator.api_key_env.is_some() {
            settings.generator.api_key_env = self.generator.api_key_env;
        }
    }
}

/// Stored connection configuration
///
/// Holds either the connection string itself or the name of an environment
/// variable that contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,
}

impl StoredConnection {
    /// Resolve the connection string, reading `url_env` if set
    pub fn resolve(&self, name: &str) -> Result<String> {
        match (&self.url, &self.url_env) {
            (Some(_), Some(_)) => Err(AskError::config_error(format!(
                "Connection '{name}' sets both url and url_env; choose one"
            ))),
            (Some(url), None) => Ok(url.clone()),
            (None, Some(env_var)) => std::env::var(env_var).map_err(|_| {
                AskError::config_error(format!(
                    "Environment variable {env_var} not found for connection '{name}'"
                ))
            }),
            (None, None) => Err(AskError::config_error(format!(
                "Connection '{name}' has neither url nor url_env"
            ))),
        }
    }
}

/// Contents of one config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub settings: SettingsOverrides,

    pub connections: HashMap<String, StoredConnection>,

    /// Name of the default connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.askdb/config.json` (team-shareable)
    Local,
    /// Global config: `~/.config/askdb/config.json` (per-user)
    Global,
}

impl ConfigLocation {
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Get path to local config file (`.askdb/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        AskError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".askdb").join("config.json"))
}

/// Get path to global config file (`~/.config/askdb/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AskError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("askdb").join("config.json"))
}

/// Load one config file; a missing file is an empty config
pub fn load_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        AskError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map_err(|e| {
        AskError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })
}

/// Effective configuration after merging files over the defaults
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: Settings,
    pub connections: HashMap<String, StoredConnection>,
    pub default: Option<String>,
}

impl Config {
    /// Layer `global` then `local` over the built-in defaults.
    ///
    /// Local settings and connections win over global ones with the same name.
    pub fn merge(global: ConfigFile, local: ConfigFile) -> Result<Self> {
        let mut settings = Settings::default();
        global.settings.apply_to(&mut settings);
        local.settings.apply_to(&mut settings);
        settings.validate()?;

        let mut connections = global.connections;
        connections.extend(local.connections);

        Ok(Self { settings, connections, default: local.default.or(global.default) })
    }

    /// Resolve a connection string by name.
    ///
    /// Without a name, the configured default is used, then a connection
    /// literally named `default`.
    pub fn resolve_connection(&self, name: Option<&str>) -> Result<String> {
        let conn_name = name
            .or(self.default.as_deref())
            .or_else(|| self.connections.contains_key("default").then_some("default"))
            .ok_or_else(|| {
                AskError::config_error(format!(
                    "No connection given and no default configured. Available connections: {:?}",
                    self.connection_names()
                ))
            })?;

        let stored = self.connections.get(conn_name).ok_or_else(|| {
            AskError::config_error(format!(
                "Connection '{conn_name}' not found. Available connections: {:?}",
                self.connection_names()
            ))
        })?;

        stored.resolve(conn_name)
    }

    /// Connection names in sorted order
    #[must_use]
    pub fn connection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Load configuration with precedence (local over global over defaults)
pub fn load_with_precedence() -> Result<Config> {
    let global = load_file(&ConfigLocation::Global.path()?)?;
    let local = load_file(&ConfigLocation::Local.path()?)?;
    Config::merge(global, local)
}
