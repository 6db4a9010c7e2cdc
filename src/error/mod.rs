//! Error handling for the flow network pipeline.

pub mod util;

use std::io;
use std::num::TryFromIntError;
use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Errors raised by the flow network pipeline.
///
/// Data-quality problems (unknown municipalities, missing geometries, unmapped
/// diagnoses) are never reported through this type; they are counted in the
/// stage reports instead.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Error opening, reading or writing a file
    #[error("IO error at {path}: {context}: {source}")]
    Io {
        path: PathBuf,
        context: String,
        #[source]
        source: io::Error,
    },
    /// Error processing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Error processing Arrow data
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Error parsing JSON configuration or reference data
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Error converting rows to or from Arrow
    #[error("Serialization error: {0}")]
    SerdeArrow(#[from] serde_arrow::Error),
    /// No partition file matched the requested filters
    #[error("No partition files in {dir} match the requested filters ({filters})")]
    NoMatchingPartitions { dir: PathBuf, filters: String },
    /// A required column is absent from a record batch
    #[error("Column '{column}' not found in {source_name}")]
    MissingColumn { column: String, source_name: String },
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
    /// The correction table is not idempotent or otherwise malformed
    #[error("Invalid correction table: {0}")]
    InvalidCorrections(String),
    /// Reference geometry that is not a valid GeoJSON FeatureCollection
    #[error("Geometry error: {0}")]
    Geometry(#[from] geojson::Error),
    /// An identifier does not fit its output column
    #[error("Value out of range: {0}")]
    OutOfRange(#[from] TryFromIntError),
    /// The worker pool could not be created
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl FlowError {
    /// Build an IO error carrying the path and a short description of the operation
    pub fn io(path: impl Into<PathBuf>, context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            context: context.into(),
            source,
        }
    }

    /// Build a missing-column error
    pub fn missing_column(column: &str, source_name: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.to_string(),
            source_name: source_name.into(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, FlowError>;
