use std::path::PathBuf;
use thiserror::Error;

use crate::batch::BatchError;
use crate::order::OrderError;

#[derive(Error, Debug)]
pub enum OrderdeskError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, OrderdeskError>;
