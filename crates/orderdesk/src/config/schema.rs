use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub archive_root: PathBuf,
    pub work_root: PathBuf,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Builds a config with default conversion and logging settings.
    pub fn new(archive_root: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            version: "1.0".to_string(),
            archive_root: archive_root.into(),
            work_root: work_root.into(),
            database_path: None,
            conversion: ConversionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Workspace directory holding the active order's uploads.
    pub fn uploads_dir(&self) -> PathBuf {
        self.work_root.join("uploads")
    }

    /// Workspace directory holding the active order's converted outputs.
    pub fn converted_dir(&self) -> PathBuf {
        self.work_root.join("converted")
    }

    /// Scratch area for conversion output. Not part of the workspace pair.
    pub fn staging_dir(&self) -> PathBuf {
        self.work_root.join("staging")
    }

    /// The configured database path, or the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "default_convert_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_convert_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_dpi() -> u32 {
    300
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            url: default_convert_url(),
            timeout_secs: default_timeout_secs(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
