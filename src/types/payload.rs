//! The validated, provider-shaped response for a single [`crate::FetchRequest`].
//!
//! A `RawHourlyPayload` only exists after the client has checked the response
//! against the expected schema (see [`crate::client::schema`]), so every
//! requested variable is present and all series have the same length.

use std::collections::BTreeMap;

/// Request-level metadata echoed by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadMetadata {
    /// Grid-cell latitude the provider actually used.
    pub latitude: f64,
    /// Grid-cell longitude the provider actually used.
    pub longitude: f64,
    /// Grid-cell elevation in meters, when reported.
    pub elevation: Option<f64>,
    /// Offset of the response's local time from UTC. `0` when the request
    /// asked for `timezone=UTC`.
    pub utc_offset_seconds: i32,
    /// Timezone name as reported, e.g. "GMT".
    pub timezone: Option<String>,
}

/// Hourly series as returned by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHourlyPayload {
    pub metadata: PayloadMetadata,
    /// Variable name to hourly values, `None` where the provider sent `null`.
    pub hourly: BTreeMap<String, Vec<Option<f64>>>,
    /// Unit strings from `hourly_units`, e.g. `temperature_2m -> "°C"`.
    pub units: BTreeMap<String, String>,
    /// The provider's `hourly.time` labels, kept only for diagnostics.
    /// They are not a trustworthy timestamp source.
    pub time_labels: Vec<String>,
}

impl RawHourlyPayload {
    /// Length shared by every value series (0 when there are none).
    pub fn value_count(&self) -> usize {
        self.hourly.values().next().map_or(0, Vec::len)
    }

    pub fn series(&self, variable: &str) -> Option<&[Option<f64>]> {
        self.hourly.get(variable).map(Vec::as_slice)
    }
}
