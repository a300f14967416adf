//! Boundary validation of the provider's JSON.
//!
//! The body is first decoded into [`ProviderResponse`], an untagged variant
//! that is either the provider's error object or a loosely-typed success
//! object. The success object is then checked key by key before it becomes a
//! [`RawHourlyPayload`]; nothing malformed reaches the reconstructor.

use crate::client::error::{FetchError, SchemaViolation};
use crate::types::fetch_request::FetchRequest;
use crate::types::payload::{PayloadMetadata, RawHourlyPayload};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const TIME_KEY: &str = "time";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ProviderResponse {
    Failure(ProviderFailure),
    Hourly(WireHourly),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProviderFailure {
    #[allow(dead_code)]
    error: bool,
    reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireHourly {
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    utc_offset_seconds: Option<i32>,
    timezone: Option<String>,
    #[serde(default)]
    hourly_units: BTreeMap<String, String>,
    hourly: Option<Map<String, Value>>,
}

/// Extracts the `reason` of an Open-Meteo error body, if the body is one.
pub(crate) fn provider_reason(body: &[u8]) -> Option<String> {
    match serde_json::from_slice::<ProviderResponse>(body) {
        Ok(ProviderResponse::Failure(failure)) => Some(failure.reason),
        _ => None,
    }
}

/// Decodes and validates a response body for `request`.
///
/// Requires `latitude`, `longitude` and `hourly`; every requested variable
/// under `hourly`; and equal length for every array under `hourly`
/// (including `time` when it is present).
pub fn parse_payload(body: &[u8], url: &str, request: &FetchRequest) -> Result<RawHourlyPayload, FetchError> {
    let response: ProviderResponse =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            source: e,
        })?;

    let wire = match response {
        ProviderResponse::Failure(failure) => {
            return Err(FetchError::ProviderError {
                reason: failure.reason,
            })
        }
        ProviderResponse::Hourly(wire) => wire,
    };

    validate(wire, request).map_err(FetchError::Schema)
}

fn validate(wire: WireHourly, request: &FetchRequest) -> Result<RawHourlyPayload, SchemaViolation> {
    let latitude = wire
        .latitude
        .ok_or_else(|| SchemaViolation::MissingKey("latitude".into()))?;
    let longitude = wire
        .longitude
        .ok_or_else(|| SchemaViolation::MissingKey("longitude".into()))?;
    let hourly = wire
        .hourly
        .ok_or_else(|| SchemaViolation::MissingKey("hourly".into()))?;

    for variable in request.variables() {
        if !hourly.contains_key(variable) {
            return Err(SchemaViolation::MissingVariable(variable.clone()));
        }
    }

    let mut expected_len: Option<(String, usize)> = None;
    let mut check_len = |key: &str, len: usize| -> Result<(), SchemaViolation> {
        match &expected_len {
            None => {
                expected_len = Some((key.to_string(), len));
                Ok(())
            }
            Some((_, expected)) if *expected == len => Ok(()),
            Some((_, expected)) => Err(SchemaViolation::LengthMismatch {
                variable: key.to_string(),
                expected: *expected,
                found: len,
            }),
        }
    };

    let mut time_labels = Vec::new();
    let mut series = BTreeMap::new();
    for (key, value) in &hourly {
        let items = value
            .as_array()
            .ok_or_else(|| SchemaViolation::NotAnArray(key.clone()))?;
        check_len(key, items.len())?;

        if key == TIME_KEY {
            time_labels = items
                .iter()
                .enumerate()
                .map(|(index, label)| match label {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    _ => Err(SchemaViolation::NonStringLabel { index }),
                })
                .collect::<Result<Vec<_>, _>>()?;
        } else if request.variables().contains(key) {
            let values = items
                .iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::Null => Ok(None),
                    Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| {
                        SchemaViolation::NonNumericValue {
                            variable: key.clone(),
                            index,
                        }
                    }),
                    _ => Err(SchemaViolation::NonNumericValue {
                        variable: key.clone(),
                        index,
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            series.insert(key.clone(), values);
        }
    }

    Ok(RawHourlyPayload {
        metadata: PayloadMetadata {
            latitude,
            longitude,
            elevation: wire.elevation,
            utc_offset_seconds: wire.utc_offset_seconds.unwrap_or(0),
            timezone: wire.timezone,
        },
        hourly: series,
        units: wire.hourly_units,
        time_labels,
    })
}
