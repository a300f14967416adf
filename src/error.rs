use crate::locations::LocationsError;
use crate::types::fetch_request::FetchRequestError;
use crate::writer::error::WriterError;
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a job as a whole. Per-unit failures never surface here;
/// they are reported in the [`crate::JobSummary`].
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("No locations given")]
    NoLocations,

    #[error("No hourly variables given")]
    NoVariables,

    #[error("Location id '{0}' appears more than once")]
    DuplicateLocation(String),

    #[error("Chunk window of {0} days is outside 1..={max}", max = crate::orchestrator::chunking::MAX_WINDOW_DAYS)]
    InvalidChunking(u32),

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Invalid request: {0}")]
    Request(#[from] FetchRequestError),

    #[error("Failed to build HTTP client")]
    HttpClientBuild(#[source] reqwest::Error),

    #[error(transparent)]
    Locations(#[from] LocationsError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("Result path exists but is not a directory: '{0}'")]
    ResultDirNotADirectory(PathBuf),

    #[error("Failed to create result directory '{0}'")]
    ResultDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to read metadata for result directory '{0}'")]
    ResultDirMetadata(PathBuf, #[source] std::io::Error),
}
