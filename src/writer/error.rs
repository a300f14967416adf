use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Failed to create output directory '{0}'")]
    DirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to create temporary file next to '{0}'")]
    TempFile(PathBuf, #[source] std::io::Error),

    #[error("Failed to move finished output into place at '{0}'")]
    Persist(PathBuf, #[source] std::io::Error),

    #[error("Encoding error writing '{0}'")]
    Encode(PathBuf, #[source] PolarsError),

    #[error("Failed to open '{0}'")]
    Open(PathBuf, #[source] std::io::Error),

    #[error("Failed to read table '{0}'")]
    Decode(PathBuf, #[source] PolarsError),

    #[error("Failed building result table: {0}")]
    Frame(#[from] PolarsError),

    #[error("Variable name '{0}' collides with a location or time column")]
    ReservedColumn(String),

    #[error("Required column '{0}' not found in table")]
    MissingColumn(String),

    #[error("Empty value in column '{column}' at row {row}")]
    NullCell { column: String, row: usize },

    #[error("Invalid timestamp '{value}' at row {row}")]
    InvalidTimestamp { value: String, row: usize },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
