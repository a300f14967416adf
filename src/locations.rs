//! Loading the location table (`id,name,latitude,longitude`) from CSV.

use crate::types::location::{LatLon, Location};
use log::{info, warn};
use polars::error::PolarsError;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task;

const ID: &str = "id";
const NAME: &str = "name";
const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";

#[derive(Debug, Error)]
pub enum LocationsError {
    #[error("Failed to read location table '{0}'")]
    Read(PathBuf, #[source] PolarsError),

    #[error("Location table '{path}' is missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Column '{column}' in '{path}' has an unusable type")]
    ColumnType {
        path: PathBuf,
        column: String,
        #[source]
        source: PolarsError,
    },

    #[error("Empty '{column}' for row {row} in '{path}'")]
    EmptyCell {
        path: PathBuf,
        column: String,
        row: usize,
    },

    #[error("Location '{id}' has an invalid coordinate {coordinate}")]
    InvalidCoordinate { id: String, coordinate: LatLon },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Reads every location from a CSV file with a header row.
///
/// Ids and names are read as text, so ids such as `007` or UUIDs survive
/// unchanged. Extra columns are ignored.
pub async fn load_locations(path: &Path) -> Result<Vec<Location>, LocationsError> {
    let path_buf = path.to_path_buf();
    let locations = task::spawn_blocking(move || read_locations(&path_buf)).await??;
    info!("Loaded {} locations from {}", locations.len(), path.display());
    Ok(locations)
}

fn read_locations(path: &Path) -> Result<Vec<Location>, LocationsError> {
    let schema = Schema::from_iter([
        Field::new(ID.into(), DataType::String),
        Field::new(NAME.into(), DataType::String),
    ]);
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(Arc::new(schema)))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| LocationsError::Read(path.to_path_buf(), e))?;

    let column = |name: &str, dtype: DataType| -> Result<Column, LocationsError> {
        df.column(name)
            .map_err(|_| LocationsError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })?
            .cast(&dtype)
            .map_err(|source| LocationsError::ColumnType {
                path: path.to_path_buf(),
                column: name.to_string(),
                source,
            })
    };
    let ids = column(ID, DataType::String)?;
    let names = column(NAME, DataType::String)?;
    let latitudes = column(LATITUDE, DataType::Float64)?;
    let longitudes = column(LONGITUDE, DataType::Float64)?;

    let type_error = |name: &str, source: PolarsError| LocationsError::ColumnType {
        path: path.to_path_buf(),
        column: name.to_string(),
        source,
    };
    let ids = ids.str().map_err(|e| type_error(ID, e))?;
    let names = names.str().map_err(|e| type_error(NAME, e))?;
    let latitudes = latitudes.f64().map_err(|e| type_error(LATITUDE, e))?;
    let longitudes = longitudes.f64().map_err(|e| type_error(LONGITUDE, e))?;

    let empty = |column: &str, row: usize| LocationsError::EmptyCell {
        path: path.to_path_buf(),
        column: column.to_string(),
        row,
    };

    let mut locations = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let id = ids
            .get(row)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| empty(ID, row))?;
        let name = names.get(row).map(str::trim).unwrap_or_default();
        let latitude = latitudes.get(row).ok_or_else(|| empty(LATITUDE, row))?;
        let longitude = longitudes.get(row).ok_or_else(|| empty(LONGITUDE, row))?;

        let coordinate = LatLon(latitude, longitude);
        if !coordinate.is_valid() {
            return Err(LocationsError::InvalidCoordinate {
                id: id.to_string(),
                coordinate,
            });
        }
        if name.is_empty() {
            warn!("Location '{}' has no name", id);
        }
        locations.push(Location::new(id, name, coordinate));
    }
    Ok(locations)
}
