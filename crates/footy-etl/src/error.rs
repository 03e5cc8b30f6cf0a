//! Error types for the ETL pipeline

use thiserror::Error;

use crate::snapshot::Entity;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the ETL pipeline
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed time value: {0:?}")]
    MalformedTimeValue(String),

    #[error("No {entity} snapshot stored for partition {partition}")]
    SnapshotNotFound { entity: Entity, partition: String },

    #[error("Refusing to write a {0} snapshot without columns")]
    EmptySnapshot(Entity),

    #[error("Source returned no {0} records")]
    EmptyPayload(Entity),

    #[error("Unsupported snapshot column {column}: {data_type}")]
    UnsupportedColumn { column: String, data_type: String },

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database setup failed: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Table error: {0}")]
    Table(#[from] footy_common::CommonError),

    #[error("Worker task failed: {0}")]
    Task(String),
}

impl EtlError {
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EtlError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error only means "nothing stored yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, EtlError::SnapshotNotFound { .. })
    }
}
