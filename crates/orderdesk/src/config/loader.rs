use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Overrides the conversion service URL.
pub const ENV_CONVERT_URL: &str = "ORDERDESK_CONVERT_URL";
/// Overrides the log level.
pub const ENV_LOG_LEVEL: &str = "ORDERDESK_LOG_LEVEL";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config);

    validate_config(&config)?;

    Ok(config)
}

/// Applies `ORDERDESK_CONVERT_URL` and `ORDERDESK_LOG_LEVEL` when set and
/// non-empty.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(url) = env_value(ENV_CONVERT_URL) {
        log::debug!("Conversion URL overridden by {}", ENV_CONVERT_URL);
        config.conversion.url = url;
    }
    if let Some(level) = env_value(ENV_LOG_LEVEL) {
        config.logging.level = level.to_ascii_lowercase();
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks that the JSON schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let archive = &config.archive_root;
    let work = &config.work_root;
    if archive == work || archive.starts_with(work) || work.starts_with(archive) {
        return Err(ConfigError::Validation {
            message: format!(
                "archive_root '{}' and work_root '{}' must be distinct and not nested",
                archive.display(),
                work.display()
            ),
        });
    }

    if !(72..=1200).contains(&config.conversion.dpi) {
        return Err(ConfigError::Validation {
            message: format!("conversion.dpi must be in 72..=1200, got {}", config.conversion.dpi),
        });
    }

    if config.conversion.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "conversion.timeout_secs must be greater than 0".to_string(),
        });
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown log level: {}", config.logging.level),
        });
    }

    Ok(())
}
