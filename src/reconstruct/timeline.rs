//! Rebuilds the per-hour timeline of a response from its request.
//!
//! The provider nests every hourly value under one request-level timestamp,
//! and its `hourly.time` labels can come back duplicated. Timestamps are
//! therefore regenerated as `start + i * step` and the labels are only
//! inspected to report how broken they were.

use crate::reconstruct::error::ReconstructError;
use crate::types::fetch_request::FetchRequest;
use crate::types::hourly_row::HourlyRow;
use crate::types::payload::RawHourlyPayload;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};

pub const HOURLY_STEP_SECONDS: i64 = 3_600;

/// The provider's native resolution.
pub fn hourly_step() -> Duration {
    Duration::seconds(HOURLY_STEP_SECONDS)
}

/// Local midnight of `date` at the declared offset, as a UTC instant.
///
/// The offset comes from the payload metadata and applies to the whole
/// request unit, including days on which the location's wall clock shifts.
pub fn start_instant(date: NaiveDate, utc_offset_seconds: i32) -> Result<DateTime<Utc>, ReconstructError> {
    let offset = FixedOffset::east_opt(utc_offset_seconds)
        .ok_or(ReconstructError::InvalidUtcOffset(utc_offset_seconds))?;
    let local_midnight = date.and_time(NaiveTime::MIN);
    offset
        .from_local_datetime(&local_midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(ReconstructError::InvalidUtcOffset(utc_offset_seconds))
}

/// Regenerates `value_count` timestamps: `start + i * step` for `i in 0..value_count`.
///
/// `raw_labels` are never used as a timestamp source.
pub fn reconstruct(
    start: DateTime<Utc>,
    step: Duration,
    value_count: usize,
    _raw_labels: &[String],
) -> Result<Vec<DateTime<Utc>>, ReconstructError> {
    if step <= Duration::zero() {
        return Err(ReconstructError::NonPositiveStep(step.num_seconds()));
    }
    let mut timestamps = Vec::with_capacity(value_count);
    let mut cursor = start;
    for i in 0..value_count {
        if i > 0 {
            cursor = cursor
                .checked_add_signed(step)
                .ok_or(ReconstructError::TimestampOverflow(i))?;
        }
        timestamps.push(cursor);
    }
    Ok(timestamps)
}

/// Checks that consecutive timestamps are exactly `step` apart.
pub fn validate_series(timestamps: &[DateTime<Utc>], step: Duration) -> Result<(), ReconstructError> {
    for (i, pair) in timestamps.windows(2).enumerate() {
        if pair[1] - pair[0] != step {
            return Err(ReconstructError::NonUniformStep(i + 1));
        }
    }
    Ok(())
}

/// How many of the provider's labels were distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelQuality {
    pub total: usize,
    pub distinct: usize,
}

impl LabelQuality {
    pub fn inspect(labels: &[String]) -> Self {
        let distinct = labels.iter().collect::<HashSet<_>>().len();
        Self {
            total: labels.len(),
            distinct,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.distinct < self.total
    }
}

/// Turns a validated payload into rows for `request.location()`.
///
/// Fails with [`ReconstructError::DataShapeMismatch`] when the number of
/// values in any requested series differs from `request.expected_hours()`; a
/// provider-declared gap is surfaced this way rather than silently producing
/// fewer rows.
pub fn rows_from_payload(
    request: &FetchRequest,
    payload: &RawHourlyPayload,
) -> Result<Vec<HourlyRow>, ReconstructError> {
    let value_count = payload.value_count();
    let expected = request.expected_hours();
    if value_count != expected {
        return Err(ReconstructError::DataShapeMismatch {
            location: request.location().id.clone(),
            span: request.span(),
            expected,
            found: value_count,
        });
    }

    let labels = LabelQuality::inspect(&payload.time_labels);
    if labels.is_degenerate() {
        warn!(
            "Provider time labels for {} are degenerate ({} distinct of {}); timestamps rebuilt from request start",
            request, labels.distinct, labels.total
        );
    }

    let step = hourly_step();
    let start = start_instant(request.span().start(), payload.metadata.utc_offset_seconds)?;
    let timestamps = reconstruct(start, step, value_count, &payload.time_labels)?;
    validate_series(&timestamps, step)?;

    let mut series = Vec::with_capacity(request.variables().len());
    for variable in request.variables() {
        let values = payload
            .series(variable)
            .ok_or_else(|| ReconstructError::MissingSeries(variable.clone()))?;
        if values.len() != value_count {
            return Err(ReconstructError::DataShapeMismatch {
                location: request.location().id.clone(),
                span: request.span(),
                expected,
                found: values.len(),
            });
        }
        series.push((variable, values));
    }

    let rows = timestamps
        .into_iter()
        .enumerate()
        .map(|(i, timestamp)| HourlyRow {
            timestamp,
            location: request.location().clone(),
            values: series
                .iter()
                .map(|(name, values)| ((*name).clone(), values[i]))
                .collect::<BTreeMap<_, _>>(),
        })
        .collect::<Vec<_>>();

    debug!("Reconstructed {} hourly rows for {}", rows.len(), request);
    Ok(rows)
}
