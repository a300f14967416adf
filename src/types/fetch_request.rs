//! The unit of work sent to the provider: one location over one date span.

use crate::types::date_span::DateSpan;
use crate::types::location::Location;
use std::fmt;
use thiserror::Error;

/// Hourly variables requested when the caller does not name any, the set the
/// downstream analytics tables are built on.
pub const DEFAULT_HOURLY_VARIABLES: [&str; 4] = [
    "temperature_2m",
    "precipitation",
    "sunshine_duration",
    "weather_code",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchRequestError {
    #[error("At least one hourly variable must be requested")]
    NoVariables,

    #[error("Hourly variable name must not be blank")]
    BlankVariable,

    #[error("Coordinate {0} of location '{1}' is out of range")]
    InvalidCoordinate(String, String),
}

/// A request for hourly values of a set of variables at one location.
///
/// Invariants, enforced by [`FetchRequest::new`]:
/// * the date span is non-empty (guaranteed by [`DateSpan`]),
/// * at least one variable is requested, each variable appears once and
///   variables keep the order they were first given in,
/// * the coordinate is a valid WGS84 position.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    location: Location,
    span: DateSpan,
    variables: Vec<String>,
}

impl FetchRequest {
    pub fn new<I, S>(location: Location, span: DateSpan, variables: I) -> Result<Self, FetchRequestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !location.coordinate.is_valid() {
            return Err(FetchRequestError::InvalidCoordinate(
                location.coordinate.to_string(),
                location.id.clone(),
            ));
        }

        let mut unique: Vec<String> = Vec::new();
        for variable in variables {
            let variable = variable.into().trim().to_string();
            if variable.is_empty() {
                return Err(FetchRequestError::BlankVariable);
            }
            if !unique.contains(&variable) {
                unique.push(variable);
            }
        }
        if unique.is_empty() {
            return Err(FetchRequestError::NoVariables);
        }

        Ok(Self {
            location,
            span,
            variables: unique,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn span(&self) -> DateSpan {
        self.span
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// `(end - start + 1) * 24`, the number of hourly values a complete
    /// response has to carry.
    pub fn expected_hours(&self) -> usize {
        self.span.expected_hours()
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.location.id, self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::location::LatLon;
    use chrono::NaiveDate;

    fn amsterdam() -> Location {
        Location::new("ams", "Amsterdam", LatLon(52.37, 4.89))
    }

    fn july_first() -> DateSpan {
        DateSpan::single_day(NaiveDate::from_ymd_opt(2022, 7, 1).unwrap())
    }

    #[test]
    fn test_variables_are_deduplicated_in_order() {
        let req = FetchRequest::new(
            amsterdam(),
            july_first(),
            ["precipitation", "temperature_2m", "precipitation"],
        )
        .unwrap();
        assert_eq!(req.variables(), ["precipitation", "temperature_2m"]);
        assert_eq!(req.expected_hours(), 24);
    }

    #[test]
    fn test_empty_variables_rejected() {
        let err = FetchRequest::new(amsterdam(), july_first(), Vec::<String>::new()).unwrap_err();
        assert_eq!(err, FetchRequestError::NoVariables);

        let err = FetchRequest::new(amsterdam(), july_first(), ["  "]).unwrap_err();
        assert_eq!(err, FetchRequestError::BlankVariable);
    }

    #[test]
    fn test_invalid_coordinate_rejected() {
        let loc = Location::new("nowhere", "Nowhere", LatLon(123.0, 0.0));
        let err = FetchRequest::new(loc, july_first(), DEFAULT_HOURLY_VARIABLES).unwrap_err();
        assert!(matches!(err, FetchRequestError::InvalidCoordinate(_, id) if id == "nowhere"));
    }
}
