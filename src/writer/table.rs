//! Writing and reading result tables on disk.

use crate::types::result_set::ResultSet;
use crate::writer::error::WriterError;
use crate::writer::frame::{from_frame, string_schema, to_frame};
use log::{debug, info};
use polars::prelude::*;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    /// Picks the format from the file extension (`.csv`, `.parquet`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(OutputFormat::Csv),
            "parquet" | "pq" => Some(OutputFormat::Parquet),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => f.write_str("csv"),
            OutputFormat::Parquet => f.write_str("parquet"),
        }
    }
}

/// Writes one row per [`crate::HourlyRow`] to `path`.
///
/// Parent directories are created as needed. The table is written to a
/// temporary file in the destination directory and renamed over `path`, so
/// a reader never observes a half-written file and an existing file is only
/// replaced once the new one is complete.
pub async fn write_result_set(
    results: &ResultSet,
    path: &Path,
    format: OutputFormat,
) -> Result<(), WriterError> {
    let df = to_frame(results)?;
    let rows = df.height();
    let path_buf = path.to_path_buf();
    task::spawn_blocking(move || write_atomic(df, &path_buf, format)).await??;
    info!("Wrote {} rows as {} to {}", rows, format, path.display());
    Ok(())
}

/// Reads a table written by [`write_result_set`] back into a result set.
pub async fn read_result_set(path: &Path, format: OutputFormat) -> Result<ResultSet, WriterError> {
    let path_buf = path.to_path_buf();
    let df = task::spawn_blocking(move || read_frame(&path_buf, format)).await??;
    debug!("Read {} rows from {}", df.height(), path.display());
    from_frame(&df)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn write_atomic(mut df: DataFrame, path: &Path, format: OutputFormat) -> Result<(), WriterError> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir).map_err(|e| WriterError::DirCreation(dir.clone(), e))?;

    let mut temp = NamedTempFile::new_in(&dir).map_err(|e| WriterError::TempFile(path.to_path_buf(), e))?;
    match format {
        OutputFormat::Csv => CsvWriter::new(temp.as_file_mut())
            .include_header(true)
            .finish(&mut df),
        OutputFormat::Parquet => ParquetWriter::new(temp.as_file_mut())
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut df)
            .map(|_| ()),
    }
    .map_err(|e| WriterError::Encode(path.to_path_buf(), e))?;

    temp.as_file_mut()
        .flush()
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| WriterError::TempFile(path.to_path_buf(), e))?;
    temp.persist(path)
        .map_err(|e| WriterError::Persist(path.to_path_buf(), e.error))?;
    Ok(())
}

fn read_frame(path: &Path, format: OutputFormat) -> Result<DataFrame, WriterError> {
    match format {
        OutputFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_schema_overwrite(Some(Arc::new(string_schema())))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish())
            .map_err(|e| WriterError::Decode(path.to_path_buf(), e)),
        OutputFormat::Parquet => {
            let file = File::open(path).map_err(|e| WriterError::Open(path.to_path_buf(), e))?;
            ParquetReader::new(file)
                .finish()
                .map_err(|e| WriterError::Decode(path.to_path_buf(), e))
        }
    }
}
