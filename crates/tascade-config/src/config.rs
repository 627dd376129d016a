// crates/tascade-config/src/config.rs
// ============================================================================
// Module: Tascade Configuration
// Description: Configuration loading, environment overrides, and validation.
// Purpose: Provide strict, fail-closed config parsing for the coordinator.
// Dependencies: serde, toml, url, thiserror
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file, overridden by `TASCADE_*`
//! environment variables, and validated before any component starts.
//! Missing or invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the database location.
pub const ENV_DATABASE_PATH: &str = "TASCADE_DATABASE_PATH";
/// Environment variable overriding the listen address.
pub const ENV_LISTEN_ADDR: &str = "TASCADE_LISTEN_ADDR";
/// Environment variable overriding the default lease TTL (seconds).
pub const ENV_LEASE_TTL_SECS: &str = "TASCADE_LEASE_TTL_SECS";
/// Environment variable overriding the default reservation TTL (seconds).
pub const ENV_RESERVATION_TTL_SECS: &str = "TASCADE_RESERVATION_TTL_SECS";
/// Environment variable overriding the heartbeat grace window (seconds).
pub const ENV_HEARTBEAT_GRACE_SECS: &str = "TASCADE_HEARTBEAT_GRACE_SECS";
/// Environment variable overriding the migrations directory.
pub const ENV_MIGRATIONS_DIR: &str = "TASCADE_MIGRATIONS_DIR";
/// Environment variable disabling authentication (dev/test only).
pub const ENV_AUTH_DISABLED: &str = "TASCADE_AUTH_DISABLED";

/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Ceiling on lease and reservation TTLs in seconds.
const MAX_TTL_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Root Tascade configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TascadeConfig {
    /// Persistence configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Lease, reservation, and sweep tuning.
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

/// Persistence target configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database location: a filesystem path or a `sqlite://` URL.
    #[serde(default = "default_database_path")]
    pub path: String,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Optional migrations directory overriding the built-in schema.
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            migrations_dir: None,
        }
    }
}

impl DatabaseConfig {
    /// Resolves the configured location to a filesystem path, accepting
    /// either a plain path or a `sqlite://` / `sqlite:` URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for non-sqlite URL schemes.
    pub fn resolve_path(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(url) = Url::parse(&self.path) {
            if url.scheme() == "sqlite" {
                let trimmed = self.path.trim_start_matches("sqlite://");
                let trimmed = trimmed.trim_start_matches("sqlite:");
                return Ok(PathBuf::from(trimmed));
            }
            if url.scheme().len() > 1 {
                return Err(ConfigError::Invalid(format!(
                    "unsupported database scheme: {}",
                    url.scheme()
                )));
            }
        }
        Ok(PathBuf::from(&self.path))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the REST surface.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Disable authentication entirely (dev/test only).
    #[serde(default)]
    pub auth_disabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth_disabled: false,
        }
    }
}

/// Lease, reservation, and sweep tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Default lease TTL in seconds.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Default reservation TTL in seconds.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,
    /// Heartbeat grace window past lease expiry in seconds.
    #[serde(default = "default_heartbeat_grace_secs")]
    pub heartbeat_grace_secs: u64,
    /// Sweep interval in seconds; defaults to half the lease TTL.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl_secs(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            heartbeat_grace_secs: default_heartbeat_grace_secs(),
            sweep_interval_secs: None,
        }
    }
}

impl SchedulingConfig {
    /// Returns the effective sweep interval: configured, or half the lease
    /// TTL with a one-second floor.
    #[must_use]
    pub fn effective_sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs.unwrap_or_else(|| (self.lease_ttl_secs / 2).max(1))
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default database path.
fn default_database_path() -> String {
    "tascade.db".to_string()
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Returns the default listen address.
fn default_listen_addr() -> String {
    "127.0.0.1:7420".to_string()
}

/// Returns the default lease TTL in seconds.
const fn default_lease_ttl_secs() -> u64 {
    900
}

/// Returns the default reservation TTL in seconds.
const fn default_reservation_ttl_secs() -> u64 {
    1_800
}

/// Returns the default heartbeat grace in seconds.
const fn default_heartbeat_grace_secs() -> u64 {
    30
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl TascadeConfig {
    /// Loads configuration from a TOML file, applies environment overrides,
    /// and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "config file exceeds {MAX_CONFIG_FILE_SIZE} bytes"
            )));
        }
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a default configuration with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an override fails to parse or validation
    /// fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TASCADE_*` environment overrides in place.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a numeric override fails to
    /// parse.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var(ENV_DATABASE_PATH) {
            self.database.path = path;
        }
        if let Ok(addr) = env::var(ENV_LISTEN_ADDR) {
            self.server.listen_addr = addr;
        }
        if let Ok(raw) = env::var(ENV_LEASE_TTL_SECS) {
            self.scheduling.lease_ttl_secs = parse_secs(ENV_LEASE_TTL_SECS, &raw)?;
        }
        if let Ok(raw) = env::var(ENV_RESERVATION_TTL_SECS) {
            self.scheduling.reservation_ttl_secs = parse_secs(ENV_RESERVATION_TTL_SECS, &raw)?;
        }
        if let Ok(raw) = env::var(ENV_HEARTBEAT_GRACE_SECS) {
            self.scheduling.heartbeat_grace_secs = parse_secs(ENV_HEARTBEAT_GRACE_SECS, &raw)?;
        }
        if let Ok(dir) = env::var(ENV_MIGRATIONS_DIR) {
            self.database.migrations_dir = Some(PathBuf::from(dir));
        }
        if let Ok(raw) = env::var(ENV_AUTH_DISABLED) {
            self.server.auth_disabled = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violating field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid("database.path must be non-empty".to_string()));
        }
        self.database.resolve_path()?;
        self.server
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "server.listen_addr is not a socket address: {}",
                    self.server.listen_addr
                ))
            })?;
        let scheduling = &self.scheduling;
        if scheduling.lease_ttl_secs == 0 || scheduling.lease_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "scheduling.lease_ttl_secs out of range: {}",
                scheduling.lease_ttl_secs
            )));
        }
        if scheduling.reservation_ttl_secs == 0 || scheduling.reservation_ttl_secs > MAX_TTL_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "scheduling.reservation_ttl_secs out of range: {}",
                scheduling.reservation_ttl_secs
            )));
        }
        if scheduling.heartbeat_grace_secs >= scheduling.lease_ttl_secs {
            return Err(ConfigError::Invalid(
                "scheduling.heartbeat_grace_secs must be below the lease TTL".to_string(),
            ));
        }
        if let Some(interval) = scheduling.sweep_interval_secs
            && (interval == 0 || interval > scheduling.lease_ttl_secs)
        {
            return Err(ConfigError::Invalid(format!(
                "scheduling.sweep_interval_secs out of range: {interval}"
            )));
        }
        if let Some(dir) = &self.database.migrations_dir
            && !dir.is_dir()
        {
            return Err(ConfigError::Invalid(format!(
                "database.migrations_dir is not a directory: {}",
                dir.display()
            )));
        }
        Ok(())
    }
}

/// Parses a seconds override.
fn parse_secs(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer: {raw}")))
}
