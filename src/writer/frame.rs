//! Conversion between a [`ResultSet`] and a flat polars [`DataFrame`].
//!
//! Layout: `location_id, location_name, latitude, longitude, datetime`,
//! then one `Float64` column per variable in result-set order. `datetime` is
//! the ISO-8601 UTC start of the hour (`2022-07-01T13:00:00Z`); missing
//! values are nulls.

use crate::types::hourly_row::HourlyRow;
use crate::types::location::{LatLon, Location};
use crate::types::result_set::{ResultSet, UnitId};
use crate::writer::error::WriterError;
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::collections::BTreeMap;

pub const LOCATION_ID: &str = "location_id";
pub const LOCATION_NAME: &str = "location_name";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const DATETIME: &str = "datetime";

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const FIXED_COLUMNS: [&str; 5] = [LOCATION_ID, LOCATION_NAME, LATITUDE, LONGITUDE, DATETIME];

/// Columns whose type must not be left to CSV inference (ids like `007`).
pub fn string_schema() -> Schema {
    Schema::from_iter([
        Field::new(LOCATION_ID.into(), DataType::String),
        Field::new(LOCATION_NAME.into(), DataType::String),
        Field::new(DATETIME.into(), DataType::String),
    ])
}

pub fn to_frame(results: &ResultSet) -> Result<DataFrame, WriterError> {
    if let Some(clash) = results
        .variables()
        .iter()
        .find(|v| FIXED_COLUMNS.contains(&v.as_str()))
    {
        return Err(WriterError::ReservedColumn(clash.clone()));
    }

    let len = results.len();
    let mut ids = Vec::with_capacity(len);
    let mut names = Vec::with_capacity(len);
    let mut latitudes = Vec::with_capacity(len);
    let mut longitudes = Vec::with_capacity(len);
    let mut datetimes = Vec::with_capacity(len);
    let mut series: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(len); results.variables().len()];

    for row in results.rows() {
        ids.push(row.location.id.as_str());
        names.push(row.location.name.as_str());
        latitudes.push(row.location.coordinate.latitude());
        longitudes.push(row.location.coordinate.longitude());
        datetimes.push(row.timestamp.format(DATETIME_FORMAT).to_string());
        for (values, variable) in series.iter_mut().zip(results.variables()) {
            values.push(row.value(variable));
        }
    }

    let mut columns = vec![
        Column::new(LOCATION_ID.into(), ids),
        Column::new(LOCATION_NAME.into(), names),
        Column::new(LATITUDE.into(), latitudes),
        Column::new(LONGITUDE.into(), longitudes),
        Column::new(DATETIME.into(), datetimes),
    ];
    for (variable, values) in results.variables().iter().zip(series) {
        columns.push(Column::new(variable.as_str().into(), values));
    }
    Ok(DataFrame::new(columns)?)
}

/// Rebuilds a result set from a table written by [`to_frame`]. Every row is
/// attributed to `UnitId(0)`.
pub fn from_frame(df: &DataFrame) -> Result<ResultSet, WriterError> {
    for name in FIXED_COLUMNS {
        if df.column(name).is_err() {
            return Err(WriterError::MissingColumn(name.to_string()));
        }
    }
    let variables: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !FIXED_COLUMNS.contains(&name.as_str()))
        .collect();

    let ids = df.column(LOCATION_ID)?.cast(&DataType::String)?;
    let ids = ids.str()?;
    let names = df.column(LOCATION_NAME)?.cast(&DataType::String)?;
    let names = names.str()?;
    let latitudes = df.column(LATITUDE)?.cast(&DataType::Float64)?;
    let latitudes = latitudes.f64()?;
    let longitudes = df.column(LONGITUDE)?.cast(&DataType::Float64)?;
    let longitudes = longitudes.f64()?;
    let datetimes = df.column(DATETIME)?.cast(&DataType::String)?;
    let datetimes = datetimes.str()?;

    let mut value_columns = Vec::with_capacity(variables.len());
    for variable in &variables {
        value_columns.push(df.column(variable)?.cast(&DataType::Float64)?);
    }
    let value_columns = value_columns
        .iter()
        .map(|c| c.f64())
        .collect::<PolarsResult<Vec<_>>>()?;

    let null_cell = |column: &str, row: usize| WriterError::NullCell {
        column: column.to_string(),
        row,
    };

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let id = ids.get(i).ok_or_else(|| null_cell(LOCATION_ID, i))?;
        let name = names.get(i).unwrap_or_default();
        let latitude = latitudes.get(i).ok_or_else(|| null_cell(LATITUDE, i))?;
        let longitude = longitudes.get(i).ok_or_else(|| null_cell(LONGITUDE, i))?;
        let raw = datetimes.get(i).ok_or_else(|| null_cell(DATETIME, i))?;
        let timestamp = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
            .map_err(|_| WriterError::InvalidTimestamp {
                value: raw.to_string(),
                row: i,
            })?
            .and_utc();

        let values = variables
            .iter()
            .zip(&value_columns)
            .map(|(variable, column)| (variable.clone(), column.get(i)))
            .collect::<BTreeMap<_, _>>();

        rows.push(HourlyRow {
            timestamp,
            location: Location::new(id, name, LatLon(latitude, longitude)),
            values,
        });
    }

    let mut results = ResultSet::new(variables);
    results.merge_unit(UnitId(0), rows);
    Ok(results)
}
