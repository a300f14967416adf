use crate::client::retry::{FetchContext, RetryPolicy};
use crate::client::source::HourlySource;
use crate::error::IngestError;
use crate::orchestrator::chunking::ChunkingPolicy;
use crate::orchestrator::summary::{JobOutcome, JobSummary};
use crate::orchestrator::unit::{RequestUnit, UnitDriver, UnitOutcome};
use crate::types::date_span::DateSpan;
use crate::types::location::Location;
use crate::types::result_set::ResultSet;
use bon::bon;
use futures_util::{stream, StreamExt};
use log::{info, warn};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Drives every request unit of a job through fetch, reconstruction and
/// merge with at most `concurrency` units in flight.
///
/// A unit that fails never aborts its siblings; the job always ends with a
/// [`JobOutcome`] holding whatever could be merged.
pub struct Orchestrator<S> {
    source: S,
    retry: RetryPolicy,
    concurrency: usize,
    // Backoff jitter is entropy-seeded when unset.
    jitter_seed: Option<u64>,
}

#[bon]
impl<S: HourlySource + Sync> Orchestrator<S> {
    #[builder]
    pub fn new(
        source: S,
        #[builder(default)] retry: RetryPolicy,
        #[builder(default = 4)] concurrency: usize,
        jitter_seed: Option<u64>,
    ) -> Self {
        Self {
            source,
            retry,
            concurrency,
            jitter_seed,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Partitions the job and runs it.
    ///
    /// Configuration problems (no locations, no variables, a bad coordinate,
    /// a bad chunk window, duplicate location ids) are returned as errors
    /// before any request is sent.
    pub async fn run(
        &self,
        span: DateSpan,
        locations: &[Location],
        variables: &[String],
        chunking: ChunkingPolicy,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, IngestError> {
        self.validate(locations, variables, chunking)?;
        let units = chunking.partition(span, locations, variables)?;
        info!(
            "Fetching {} for {} location(s) in {} unit(s), {} at a time",
            span,
            locations.len(),
            units.len(),
            self.concurrency
        );
        Ok(self.run_units(units, variables, cancel).await)
    }

    /// Runs an explicit list of units. Units may overlap; overlaps are
    /// resolved by the result set's merge rules.
    pub async fn run_units(
        &self,
        units: Vec<RequestUnit>,
        variables: &[String],
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let ctx = match self.jitter_seed {
            Some(seed) => FetchContext::with_seed(self.retry.clone(), seed),
            None => FetchContext::new(self.retry.clone()),
        };
        let results = Mutex::new(ResultSet::new(variables.iter().cloned()));
        let driver = UnitDriver {
            source: &self.source,
            ctx: &ctx,
            results: &results,
            cancel,
        };
        let driver = &driver;

        let outcomes: Vec<UnitOutcome> = stream::iter(units)
            .map(move |unit| driver.drive(unit))
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        let results = results.into_inner();
        let summary = JobSummary::new(outcomes, ctx.stats(), &results);
        if summary.is_complete() {
            info!("{}", summary.to_string().trim_end());
        } else {
            warn!("{}", summary.to_string().trim_end());
        }
        JobOutcome { results, summary }
    }

    fn validate(
        &self,
        locations: &[Location],
        variables: &[String],
        chunking: ChunkingPolicy,
    ) -> Result<(), IngestError> {
        if self.concurrency == 0 {
            return Err(IngestError::InvalidConcurrency);
        }
        if !chunking.is_valid() {
            return Err(IngestError::InvalidChunking(chunking.window_days));
        }
        if locations.is_empty() {
            return Err(IngestError::NoLocations);
        }
        if variables.iter().all(|v| v.trim().is_empty()) {
            return Err(IngestError::NoVariables);
        }
        let mut seen = HashSet::new();
        for location in locations {
            if !seen.insert(location.id.as_str()) {
                return Err(IngestError::DuplicateLocation(location.id.clone()));
            }
        }
        Ok(())
    }
}
