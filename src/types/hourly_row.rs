use crate::types::location::Location;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One reconstructed hour of observations at one location.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRow {
    /// Start of the hour, as an absolute UTC instant.
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    /// Variable name to value, `None` for values the provider left empty.
    pub values: BTreeMap<String, Option<f64>>,
}

impl HourlyRow {
    /// Key the result set deduplicates and sorts on.
    pub fn key(&self) -> RowKey {
        RowKey {
            location_id: self.location.id.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn value(&self, variable: &str) -> Option<f64> {
        self.values.get(variable).copied().flatten()
    }

    /// `true` if both rows carry the same value for every variable either of
    /// them has. Missing on both sides counts as equal.
    pub fn same_values(&self, other: &HourlyRow) -> bool {
        self.values
            .keys()
            .chain(other.values.keys())
            .all(|name| same_value(self.values.get(name), other.values.get(name)))
    }
}

fn same_value(a: Option<&Option<f64>>, b: Option<&Option<f64>>) -> bool {
    match (a.copied().flatten(), b.copied().flatten()) {
        (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
        (None, None) => true,
        _ => false,
    }
}

/// `(location, timestamp)`; ordering sorts by location id first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub location_id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::location::LatLon;
    use chrono::TimeZone;

    fn row(hour: u32, temp: Option<f64>) -> HourlyRow {
        HourlyRow {
            timestamp: Utc.with_ymd_and_hms(2022, 7, 1, hour, 0, 0).unwrap(),
            location: Location::new("a", "A", LatLon(1.0, 2.0)),
            values: BTreeMap::from([("temperature_2m".to_string(), temp)]),
        }
    }

    #[test]
    fn test_key_orders_by_location_then_time() {
        let mut b = row(0, None);
        b.location.id = "b".into();
        let a_late = row(5, None);
        assert!(a_late.key() < b.key());
        assert!(row(1, None).key() < a_late.key());
    }

    #[test]
    fn test_same_values() {
        assert!(row(0, Some(13.0)).same_values(&row(0, Some(13.0))));
        assert!(row(0, None).same_values(&row(0, None)));
        assert!(!row(0, Some(13.0)).same_values(&row(0, Some(12.7))));
        assert!(!row(0, Some(13.0)).same_values(&row(0, None)));

        let mut extra = row(0, Some(13.0));
        extra.values.insert("precipitation".into(), Some(0.2));
        assert!(!row(0, Some(13.0)).same_values(&extra));
    }
}
