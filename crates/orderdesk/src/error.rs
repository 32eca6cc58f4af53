use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the top-level order operations.
///
/// Per-file physical failures are not represented here: they are logged and
/// collected into the operation's report. An `OrderError` means the operation
/// as a whole was rejected or could not complete.
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("User {user_id} is not allowed to {action} order {order_number}")]
    Unauthorized {
        user_id: i64,
        action: &'static str,
        order_number: String,
    },

    #[error("Integrity conflict: {0}")]
    IntegrityConflict(String),

    #[error("Invalid status '{0}' (expected one of: pending, material, reviewed)")]
    InvalidStatus(String),

    #[error("Invalid merge request: {0}")]
    InvalidMerge(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workspace lock poisoned")]
    WorkspacePoisoned,
}

impl OrderError {
    pub(crate) fn order_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            kind: "Order",
            key: key.to_string(),
        }
    }

    pub(crate) fn user_not_found(id: i64) -> Self {
        Self::NotFound {
            kind: "User",
            key: id.to_string(),
        }
    }

    pub(crate) fn file_not_found(id: i64) -> Self {
        Self::NotFound {
            kind: "File",
            key: id.to_string(),
        }
    }
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

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list directory '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid filename '{0}'")]
    InvalidFilename(String),
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion service unavailable at {0}")]
    Unavailable(String),

    #[error("Conversion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Conversion service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Conversion service reported failure: {0}")]
    Rejected(String),

    #[error("Source file missing for conversion: {0}")]
    SourceMissing(PathBuf),
}

pub type Result<T> = std::result::Result<T, OrderError>;
