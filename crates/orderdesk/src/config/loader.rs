use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Hard ceiling for `claims.maxBatchSize`.
pub const MAX_BATCH_SIZE_LIMIT: u32 = 500;

/// Returns the canonical config path: `~/.orderdesk/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".orderdesk").join("config.json"))
}

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

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
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

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let claims = &config.claims;
    if claims.max_batch_size == 0 || claims.max_batch_size > MAX_BATCH_SIZE_LIMIT {
        return Err(ConfigError::Validation {
            message: format!(
                "claims.maxBatchSize must be between 1 and {}",
                MAX_BATCH_SIZE_LIMIT
            ),
        });
    }
    if claims.default_batch_size == 0 || claims.default_batch_size > claims.max_batch_size {
        return Err(ConfigError::Validation {
            message: format!(
                "claims.defaultBatchSize must be between 1 and maxBatchSize ({})",
                claims.max_batch_size
            ),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for folder in &config.orders.default_folders {
        if folder.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "orders.defaultFolders must not contain blank names".to_string(),
            });
        }
        if !seen.insert(folder.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate default folder '{}'", folder),
            });
        }
    }

    Ok(())
}
