//! Configuration loading.
//!
//! Loads `config.toml` (default `~/.erp-kernel/config.toml`). Every section
//! has defaults, so an empty file is valid. Environment variables override
//! file values.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::sanitize::SanitizePolicy;

/// Env var overriding [`DatabaseConfig::path`].
pub const ENV_DB_PATH: &str = "ERP_KERNEL_DB_PATH";
/// Env var overriding [`SanitizeConfig::policy`].
pub const ENV_SANITIZE_POLICY: &str = "ERP_KERNEL_SANITIZE_POLICY";
/// Env var overriding [`LoggingConfig::level`].
pub const ENV_LOG_LEVEL: &str = "ERP_KERNEL_LOG_LEVEL";

/// Top-level kernel configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// SQLite database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Write sanitization policy.
    #[serde(default)]
    pub sanitize: SanitizeConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite database settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path. Relative paths resolve against the working directory.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Write sanitization settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SanitizeConfig {
    /// `drop` (default) silently removes non-writable keys; `reject` fails
    /// the whole mutation.
    #[serde(default)]
    pub policy: SanitizePolicy,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated JSON logs. Unset means stderr only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

// Default value functions for serde

fn default_db_path() -> PathBuf {
    PathBuf::from("erp-kernel.db")
}
fn default_max_connections() -> u32 {
    8
}
fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides through `env`, a resolver injected so
    /// tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env(ENV_DB_PATH) {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = env(ENV_SANITIZE_POLICY) {
            match SanitizePolicy::parse(&v) {
                Ok(policy) => self.sanitize.policy = policy,
                Err(err) => warn!(
                    var = ENV_SANITIZE_POLICY,
                    error = %err,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
    }
}

/// Load config from a TOML file and apply environment overrides.
///
/// A missing file yields defaults; an unreadable or malformed one is an error.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.erp-kernel/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".erp-kernel"))
}

/// Path of the default config file (`~/.erp-kernel/config.toml`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
