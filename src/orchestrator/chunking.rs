//! Splitting a job into request units.

use crate::orchestrator::unit::RequestUnit;
use crate::types::date_span::DateSpan;
use crate::types::fetch_request::{FetchRequest, FetchRequestError};
use crate::types::location::Location;
use crate::types::result_set::UnitId;
use bon::Builder;

/// Longest window a single request may cover.
pub const MAX_WINDOW_DAYS: u32 = 366;

/// One unit per location per window of `window_days` days.
///
/// Windows keep payloads small and confine a failure to a bounded slice of
/// time; they never overlap, so a correctly behaving provider cannot produce
/// merge conflicts between units of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct ChunkingPolicy {
    #[builder(default = 31)]
    pub window_days: u32,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ChunkingPolicy {
    pub fn is_valid(&self) -> bool {
        (1..=MAX_WINDOW_DAYS).contains(&self.window_days)
    }

    /// Units ordered by location (in the given order), then by window start.
    pub fn partition(
        &self,
        span: DateSpan,
        locations: &[Location],
        variables: &[String],
    ) -> Result<Vec<RequestUnit>, FetchRequestError> {
        let windows = span.windows(self.window_days);
        let mut units = Vec::with_capacity(locations.len() * windows.len());
        for location in locations {
            for window in &windows {
                let request = FetchRequest::new(location.clone(), *window, variables.iter().cloned())?;
                units.push(RequestUnit {
                    id: UnitId(units.len()),
                    request,
                });
            }
        }
        Ok(units)
    }
}
