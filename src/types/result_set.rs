//! The merged, deduplicated output of an ingest job.

use crate::types::hourly_row::{HourlyRow, RowKey};
use log::{debug, warn};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifies a request unit within one job (its position in the partition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Two units produced different values for the same `(location, timestamp)`.
///
/// The row from `kept_unit` stays in the result set; the row from
/// `rejected_unit` is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub key: RowKey,
    pub kept_unit: UnitId,
    pub rejected_unit: UnitId,
    pub kept: BTreeMap<String, Option<f64>>,
    pub rejected: BTreeMap<String, Option<f64>>,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conflict at {} {}: kept {} {:?}, rejected {} {:?}",
            self.key.location_id,
            self.key.timestamp.to_rfc3339(),
            self.kept_unit,
            self.kept,
            self.rejected_unit,
            self.rejected
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MergedRow {
    row: HourlyRow,
    unit: UnitId,
}

/// Ordered collection of [`HourlyRow`]s keyed by `(location, timestamp)`.
///
/// * no key appears twice: the first merged row for a key wins,
/// * iteration is sorted by location id, then timestamp, no matter in which
///   order units were merged,
/// * a later row with different values is recorded as a [`MergeConflict`];
///   a later row with identical values is only counted as a duplicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    variables: Vec<String>,
    rows: BTreeMap<RowKey, MergedRow>,
    conflicts: Vec<MergeConflict>,
    duplicates: usize,
}

impl ResultSet {
    /// Creates an empty result set whose table columns follow `variables`.
    pub fn new<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for v in variables {
            let v = v.into();
            if !unique.contains(&v) {
                unique.push(v);
            }
        }
        Self {
            variables: unique,
            ..Default::default()
        }
    }

    /// Merges every row of one unit. The call is all-or-nothing from the
    /// caller's point of view: it takes `&mut self` and cannot fail halfway.
    ///
    /// Returns the conflicts this unit caused.
    pub fn merge_unit(&mut self, unit: UnitId, rows: Vec<HourlyRow>) -> Vec<MergeConflict> {
        let mut new_conflicts = Vec::new();
        for row in rows {
            for name in row.values.keys() {
                if !self.variables.contains(name) {
                    self.variables.push(name.clone());
                }
            }
            match self.rows.entry(row.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(MergedRow { row, unit });
                }
                Entry::Occupied(existing) => {
                    let existing = existing.get();
                    if existing.row.same_values(&row) {
                        self.duplicates += 1;
                        debug!(
                            "Duplicate row for {} at {} from {} ignored (identical to {})",
                            row.location.id, row.timestamp, unit, existing.unit
                        );
                        continue;
                    }
                    let conflict = MergeConflict {
                        key: row.key(),
                        kept_unit: existing.unit,
                        rejected_unit: unit,
                        kept: existing.row.values.clone(),
                        rejected: row.values,
                    };
                    warn!("Merge {}", conflict);
                    new_conflicts.push(conflict);
                }
            }
        }
        self.conflicts.extend(new_conflicts.iter().cloned());
        new_conflicts
    }

    /// Rows sorted by location id, then timestamp.
    pub fn rows(&self) -> impl Iterator<Item = &HourlyRow> {
        self.rows.values().map(|merged| &merged.row)
    }

    pub fn into_rows(self) -> Vec<HourlyRow> {
        self.rows.into_values().map(|merged| merged.row).collect()
    }

    pub fn get(&self, key: &RowKey) -> Option<&HourlyRow> {
        self.rows.get(key).map(|merged| &merged.row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column order used by the writer.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn conflicts(&self) -> &[MergeConflict] {
        &self.conflicts
    }

    /// Rows dropped because an identical row was already present.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Distinct location ids, sorted.
    pub fn location_ids(&self) -> BTreeSet<&str> {
        self.rows.keys().map(|k| k.location_id.as_str()).collect()
    }
}
