use crate::client::retry::FetchStats;
use crate::orchestrator::unit::{FailureKind, UnitOutcome, UnitStatus};
use crate::types::result_set::{MergeConflict, ResultSet, UnitId};
use std::collections::BTreeMap;
use std::fmt;

/// Per-unit outcomes of one run plus the run's counters.
///
/// Every unit of the partition appears in `units` exactly once, sorted by
/// [`UnitId`].
#[derive(Debug)]
pub struct JobSummary {
    pub units: Vec<UnitOutcome>,
    pub stats: FetchStats,
    pub conflicts: Vec<MergeConflict>,
    pub duplicates: usize,
}

impl JobSummary {
    pub(crate) fn new(mut units: Vec<UnitOutcome>, stats: FetchStats, results: &ResultSet) -> Self {
        units.sort_by_key(|outcome| outcome.unit.id);
        Self {
            units,
            stats,
            conflicts: results.conflicts().to_vec(),
            duplicates: results.duplicates(),
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|o| o.is_merged())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|o| o.failure().is_some())
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Cancelled))
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitOutcome> {
        self.units.iter().find(|o| o.unit.id == id)
    }

    /// `true` if every unit was merged.
    pub fn is_complete(&self) -> bool {
        self.units.iter().all(UnitOutcome::is_merged)
    }

    pub fn failure_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for failure in self.units.iter().filter_map(UnitOutcome::failure) {
            *counts.entry(failure.kind.to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_failed(&self, kind: FailureKind) -> usize {
        self.units
            .iter()
            .filter_map(UnitOutcome::failure)
            .filter(|f| f.kind == kind)
            .count()
    }

    pub fn rows_merged(&self) -> usize {
        self.units
            .iter()
            .map(|o| match o.status {
                UnitStatus::Merged { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} units: {} merged, {} failed, {} cancelled; {} requests, {} retries ({} rate limited), {} conflicts, {} duplicate rows",
            self.units.len(),
            self.succeeded().count(),
            self.failed().count(),
            self.cancelled().count(),
            self.stats.requests,
            self.stats.retries,
            self.stats.rate_limited,
            self.conflicts.len(),
            self.duplicates,
        )?;
        for outcome in self.failed() {
            if let Some(failure) = outcome.failure() {
                writeln!(
                    f,
                    "  {} failed after {} attempt(s): {}",
                    outcome.unit, outcome.attempts, failure
                )?;
            }
        }
        Ok(())
    }
}

/// Output of [`crate::Orchestrator::run`]: whatever could be merged, plus an
/// account of what could not.
#[derive(Debug)]
pub struct JobOutcome {
    pub results: ResultSet,
    pub summary: JobSummary,
}
