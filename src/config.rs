//! Configuration loading.
//!
//! `config.toml` holds the database location, message limits, and logging
//! settings. Every section is optional. `MESSAGABLE_DB_PATH` overrides the
//! database path.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// SQLite settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Validation limits applied when messages are created.
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path. Relative paths resolve against [`config_dir`].
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Pool size.
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

/// Validation limits applied when messages are created.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Maximum subject length in characters.
    #[serde(default = "default_max_subject_len")]
    pub max_subject_len: usize,

    /// Maximum body size in bytes.
    #[serde(default = "default_max_content_size")]
    pub max_content_size: usize,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_subject_len: default_max_subject_len(),
            max_content_size: default_max_content_size(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated JSON logs. Relative paths resolve against [`config_dir`].
    #[serde(default = "default_logs_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_logs_dir(),
        }
    }
}

// Default value functions for serde

fn default_db_path() -> PathBuf {
    PathBuf::from("messages.db")
}
fn default_max_connections() -> u32 {
    4
}
fn default_max_subject_len() -> usize {
    255
}
fn default_max_content_size() -> usize {
    64 * 1024
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Config {
    /// Apply environment overrides through `env` (a resolver, so tests need
    /// not mutate the process environment).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(path) = env("MESSAGABLE_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = env("MESSAGABLE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Database path, resolved against `base` when relative.
    pub fn db_path(&self, base: &Path) -> PathBuf {
        resolve_against(base, &self.database.path)
    }

    /// Logs directory, resolved against `base` when relative.
    pub fn logs_dir(&self, base: &Path) -> PathBuf {
        resolve_against(base, &self.logging.dir)
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.messagable/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".messagable"))
}
