use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Where the rolling log file goes when journald is not reachable.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits for the SQLite write lock before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: u64,

    /// Accepted image formats, matched against the sniffed content (not the file name).
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_allowed_formats() -> Vec<String> {
    vec!["jpeg".to_string(), "png".to_string(), "gif".to_string()]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_upload_bytes(),
            allowed_formats: default_allowed_formats(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts at committing the local delete once the blob is already gone.
    #[serde(default = "default_commit_retry_attempts")]
    pub commit_retry_attempts: u32,

    #[serde(default = "default_commit_retry_backoff_ms")]
    pub commit_retry_backoff_ms: u64,
}

fn default_commit_retry_attempts() -> u32 {
    3
}

fn default_commit_retry_backoff_ms() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_retry_attempts: default_commit_retry_attempts(),
            commit_retry_backoff_ms: default_commit_retry_backoff_ms(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixbloom")
}

fn default_db_path() -> PathBuf {
    data_dir().join("pixbloom.db")
}

fn default_log_dir() -> PathBuf {
    data_dir().join("logs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            database: DatabaseConfig::default(),
            upload: UploadConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load from `PIXBLOOM_CONFIG` or the default location, writing defaults if absent.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var_os("PIXBLOOM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_path);
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pixbloom")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
