//! The per-unit state machine.
//!
//! ```text
//! Pending -> Fetching -> Reconstructing -> Merged
//!               |  ^
//!               v  |
//!        FailedRetryable          (until the retry budget is spent)
//!               |
//!               v
//!          FailedTerminal
//! ```
//!
//! Any state that waits (the rate gate, a backoff sleep) can move to
//! `Cancelled` when the job's cancellation token fires. A request that is
//! already on the wire is allowed to finish and be merged.

use crate::client::error::{FetchError, FetchErrorKind};
use crate::client::retry::FetchContext;
use crate::client::source::HourlySource;
use crate::reconstruct::error::ReconstructError;
use crate::reconstruct::timeline::rows_from_payload;
use crate::types::fetch_request::FetchRequest;
use crate::types::payload::RawHourlyPayload;
use crate::types::result_set::{ResultSet, UnitId};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One bounded (location, date span) slice of the job.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestUnit {
    pub id: UnitId,
    pub request: FetchRequest,
}

impl fmt::Display for RequestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.request)
    }
}

/// The terminal failure categories reported per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Still failing transiently after the retry budget was spent.
    TransientFetch,
    /// Rejected by the provider or unusable response; never retried.
    PermanentFetch,
    /// Value count disagrees with the requested span.
    DataShapeMismatch,
    /// Payload could not be turned into a timeline for another reason.
    Reconstruction,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::TransientFetch => "TransientFetchError",
            FailureKind::PermanentFetch => "PermanentFetchError",
            FailureKind::DataShapeMismatch => "DataShapeMismatch",
            FailureKind::Reconstruction => "ReconstructionError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
}

#[derive(Debug)]
pub struct UnitFailure {
    pub kind: FailureKind,
    pub error: UnitError,
}

impl UnitFailure {
    fn from_fetch(error: FetchError) -> Self {
        let kind = match error.kind() {
            FetchErrorKind::Transient => FailureKind::TransientFetch,
            FetchErrorKind::Permanent => FailureKind::PermanentFetch,
        };
        Self {
            kind,
            error: error.into(),
        }
    }

    fn from_reconstruct(error: ReconstructError) -> Self {
        let kind = match error {
            ReconstructError::DataShapeMismatch { .. } => FailureKind::DataShapeMismatch,
            _ => FailureKind::Reconstruction,
        };
        Self {
            kind,
            error: error.into(),
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

#[derive(Debug)]
pub enum UnitState {
    Pending,
    Fetching { attempt: u32 },
    FailedRetryable { attempt: u32, error: FetchError, delay: Duration },
    Reconstructing { attempt: u32, payload: RawHourlyPayload },
    Merged { rows: usize, conflicts: usize },
    FailedTerminal(UnitFailure),
    Cancelled,
}

/// Payload-free name of a [`UnitState`], kept in each unit's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Pending,
    Fetching,
    FailedRetryable,
    Reconstructing,
    Merged,
    FailedTerminal,
    Cancelled,
}

impl UnitState {
    pub fn phase(&self) -> UnitPhase {
        match self {
            UnitState::Pending => UnitPhase::Pending,
            UnitState::Fetching { .. } => UnitPhase::Fetching,
            UnitState::FailedRetryable { .. } => UnitPhase::FailedRetryable,
            UnitState::Reconstructing { .. } => UnitPhase::Reconstructing,
            UnitState::Merged { .. } => UnitPhase::Merged,
            UnitState::FailedTerminal(_) => UnitPhase::FailedTerminal,
            UnitState::Cancelled => UnitPhase::Cancelled,
        }
    }
}

/// Final state of a unit.
#[derive(Debug)]
pub enum UnitStatus {
    Merged { rows: usize, conflicts: usize },
    Failed(UnitFailure),
    Cancelled,
}

#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: RequestUnit,
    /// Number of requests sent for this unit.
    pub attempts: u32,
    /// Every state the unit passed through, in order.
    pub history: Vec<UnitPhase>,
    pub status: UnitStatus,
}

impl UnitOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self.status, UnitStatus::Merged { .. })
    }

    pub fn failure(&self) -> Option<&UnitFailure> {
        match &self.status {
            UnitStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Everything a unit needs from its run.
pub(crate) struct UnitDriver<'a, S> {
    pub source: &'a S,
    pub ctx: &'a FetchContext,
    pub results: &'a Mutex<ResultSet>,
    pub cancel: &'a CancellationToken,
}

impl<S: HourlySource> UnitDriver<'_, S> {
    /// Runs `unit` from `Pending` to a terminal state.
    pub async fn drive(&self, unit: RequestUnit) -> UnitOutcome {
        let mut history = Vec::new();
        let mut attempts = 0;
        let mut state = UnitState::Pending;
        loop {
            history.push(state.phase());
            state = match state {
                UnitState::Pending => {
                    if self.cancel.is_cancelled() {
                        debug!("{} not dispatched, job cancelled", unit);
                        UnitState::Cancelled
                    } else {
                        info!("Dispatching {}", unit);
                        UnitState::Fetching { attempt: 1 }
                    }
                }
                UnitState::Fetching { attempt } => {
                    attempts = attempt;
                    self.fetch(&unit, attempt).await
                }
                UnitState::FailedRetryable {
                    attempt,
                    error,
                    delay,
                } => {
                    warn!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        unit, attempt, error, delay
                    );
                    self.ctx.record_backoff_sleep();
                    if sleep_or_cancel(Instant::now() + delay, self.cancel).await {
                        UnitState::Fetching {
                            attempt: attempt + 1,
                        }
                    } else {
                        UnitState::Cancelled
                    }
                }
                UnitState::Reconstructing { payload, .. } => {
                    match rows_from_payload(&unit.request, &payload) {
                        Ok(rows) => {
                            let row_count = rows.len();
                            let conflicts = {
                                let mut results = self.results.lock().await;
                                results.merge_unit(unit.id, rows).len()
                            };
                            UnitState::Merged {
                                rows: row_count,
                                conflicts,
                            }
                        }
                        Err(e) => UnitState::FailedTerminal(UnitFailure::from_reconstruct(e)),
                    }
                }
                UnitState::Merged { rows, conflicts } => {
                    info!("{} merged {} rows ({} conflicts)", unit, rows, conflicts);
                    return UnitOutcome {
                        unit,
                        attempts,
                        history,
                        status: UnitStatus::Merged { rows, conflicts },
                    };
                }
                UnitState::FailedTerminal(failure) => {
                    error!("{} failed after {} attempt(s): {}", unit, attempts, failure);
                    return UnitOutcome {
                        unit,
                        attempts,
                        history,
                        status: UnitStatus::Failed(failure),
                    };
                }
                UnitState::Cancelled => {
                    return UnitOutcome {
                        unit,
                        attempts,
                        history,
                        status: UnitStatus::Cancelled,
                    };
                }
            };
        }
    }

    async fn fetch(&self, unit: &RequestUnit, attempt: u32) -> UnitState {
        if let Some(deadline) = self.ctx.gate_deadline().await {
            debug!("{} waiting for rate gate", unit);
            if !sleep_or_cancel(deadline, self.cancel).await {
                return UnitState::Cancelled;
            }
        }
        self.ctx.record_request();
        match self.source.fetch_once(&unit.request).await {
            Ok(payload) => UnitState::Reconstructing { attempt, payload },
            Err(error) if error.is_transient() && self.ctx.policy().allows_retry(attempt) => {
                let delay = self.ctx.schedule_retry(attempt, &error).await;
                UnitState::FailedRetryable {
                    attempt,
                    error,
                    delay,
                }
            }
            Err(error) => UnitState::FailedTerminal(UnitFailure::from_fetch(error)),
        }
    }
}

/// `false` if the token fired before `deadline`.
async fn sleep_or_cancel(deadline: Instant, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::retry::RetryPolicy;
    use crate::types::date_span::DateSpan;
    use crate::types::location::{LatLon, Location};
    use crate::types::payload::PayloadMetadata;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, VecDeque};
    use std::future::Future;
    use std::sync::Mutex as StdMutex;

    enum Reply {
        Ok(usize),
        /// Extra series of the first length, requested series of the second.
        Uneven(usize, usize),
        Status(u16),
    }

    struct ScriptedSource {
        replies: StdMutex<VecDeque<Reply>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
            }
        }
    }

    impl HourlySource for ScriptedSource {
        fn fetch_once(
            &self,
            _request: &FetchRequest,
        ) -> impl Future<Output = Result<RawHourlyPayload, FetchError>> + Send {
            let reply = self.replies.lock().unwrap().pop_front();
            async move {
                match reply {
                    Some(Reply::Ok(count)) => Ok(payload(BTreeMap::from([(
                        "temperature_2m".to_string(),
                        vec![Some(1.0); count],
                    )]))),
                    Some(Reply::Uneven(extra, requested)) => Ok(payload(BTreeMap::from([
                        ("aaa_extra".to_string(), vec![Some(0.0); extra]),
                        ("temperature_2m".to_string(), vec![Some(1.0); requested]),
                    ]))),
                    Some(Reply::Status(code)) => Err(FetchError::HttpStatus {
                        url: "stub".into(),
                        status: reqwest::StatusCode::from_u16(code).unwrap(),
                        reason: None,
                    }),
                    None => panic!("no scripted reply left"),
                }
            }
        }
    }

    fn payload(hourly: BTreeMap<String, Vec<Option<f64>>>) -> RawHourlyPayload {
        RawHourlyPayload {
            metadata: PayloadMetadata {
                latitude: 0.0,
                longitude: 0.0,
                elevation: None,
                utc_offset_seconds: 0,
                timezone: None,
            },
            hourly,
            units: BTreeMap::new(),
            time_labels: vec![],
        }
    }

    fn unit() -> RequestUnit {
        RequestUnit {
            id: UnitId(0),
            request: FetchRequest::new(
                Location::new("a", "A", LatLon(1.0, 1.0)),
                DateSpan::single_day(NaiveDate::from_ymd_opt(2022, 7, 1).unwrap()),
                ["temperature_2m"],
            )
            .unwrap(),
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    async fn drive(source: &ScriptedSource, max_retries: u32, cancel: &CancellationToken) -> (UnitOutcome, ResultSet) {
        let ctx = FetchContext::with_seed(fast_policy(max_retries), 0);
        drive_in(&ctx, source, cancel).await
    }

    async fn drive_in(
        ctx: &FetchContext,
        source: &ScriptedSource,
        cancel: &CancellationToken,
    ) -> (UnitOutcome, ResultSet) {
        let results = Mutex::new(ResultSet::new(["temperature_2m"]));
        let outcome = UnitDriver {
            source,
            ctx,
            results: &results,
            cancel,
        }
        .drive(unit())
        .await;
        (outcome, results.into_inner())
    }

    #[tokio::test]
    async fn test_retry_then_merge_history() {
        let source = ScriptedSource::new(vec![Reply::Status(503), Reply::Status(502), Reply::Ok(24)]);
        let (outcome, results) = drive(&source, 3, &CancellationToken::new()).await;

        assert!(outcome.is_merged());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            outcome.history,
            vec![
                UnitPhase::Pending,
                UnitPhase::Fetching,
                UnitPhase::FailedRetryable,
                UnitPhase::Fetching,
                UnitPhase::FailedRetryable,
                UnitPhase::Fetching,
                UnitPhase::Reconstructing,
                UnitPhase::Merged,
            ]
        );
        assert_eq!(results.len(), 24);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_is_terminal() {
        let source = ScriptedSource::new(vec![Reply::Status(500), Reply::Status(500), Reply::Status(500)]);
        let (outcome, results) = drive(&source, 2, &CancellationToken::new()).await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::TransientFetch);
        assert_eq!(outcome.history.last(), Some(&UnitPhase::FailedTerminal));
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let source = ScriptedSource::new(vec![Reply::Status(404)]);
        let (outcome, _) = drive(&source, 5, &CancellationToken::new()).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::PermanentFetch);
        assert_eq!(
            outcome.history,
            vec![UnitPhase::Pending, UnitPhase::Fetching, UnitPhase::FailedTerminal]
        );
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_terminal_and_not_merged() {
        let source = ScriptedSource::new(vec![Reply::Ok(23)]);
        let (outcome, results) = drive(&source, 5, &CancellationToken::new()).await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::DataShapeMismatch);
        assert!(failure.to_string().starts_with("DataShapeMismatch: "));
        assert_eq!(outcome.attempts, 1);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_uneven_series_fail_the_unit() {
        let source = ScriptedSource::new(vec![Reply::Uneven(24, 23)]);
        let (outcome, results) = drive(&source, 5, &CancellationToken::new()).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::DataShapeMismatch);
        assert_eq!(outcome.history.last(), Some(&UnitPhase::FailedTerminal));
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let source = ScriptedSource::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (outcome, _) = drive(&source, 5, &cancel).await;
        assert!(matches!(outcome.status, UnitStatus::Cancelled));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.history, vec![UnitPhase::Pending, UnitPhase::Cancelled]);
    }

    /// Drives one unit and cancels the token after `after`, failing the test
    /// if the unit is still waiting a few seconds later.
    async fn drive_and_cancel(ctx: &FetchContext, source: &ScriptedSource, after: Duration) -> (UnitOutcome, ResultSet) {
        let cancel = CancellationToken::new();
        let trigger = async {
            tokio::time::sleep(after).await;
            cancel.cancel();
        };
        let run = tokio::time::timeout(Duration::from_secs(5), drive_in(ctx, source, &cancel));
        let (outcome, ()) = tokio::join!(run, trigger);
        outcome.expect("cancel did not interrupt the wait")
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff_sleep() {
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .base_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(120))
            .build();
        let ctx = FetchContext::with_seed(policy, 0);
        let source = ScriptedSource::new(vec![Reply::Status(503)]);

        let (outcome, results) = drive_and_cancel(&ctx, &source, Duration::from_millis(50)).await;

        assert!(matches!(outcome.status, UnitStatus::Cancelled));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            outcome.history,
            vec![
                UnitPhase::Pending,
                UnitPhase::Fetching,
                UnitPhase::FailedRetryable,
                UnitPhase::Cancelled,
            ]
        );
        assert_eq!(ctx.stats().requests, 1);
        assert_eq!(ctx.stats().backoff_sleeps, 1);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_rate_gate_wait() {
        let ctx = FetchContext::with_seed(fast_policy(3), 0);
        ctx.pause_all(Duration::from_secs(60)).await;
        let source = ScriptedSource::new(vec![]);

        let (outcome, results) = drive_and_cancel(&ctx, &source, Duration::from_millis(50)).await;

        assert!(matches!(outcome.status, UnitStatus::Cancelled));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            outcome.history,
            vec![UnitPhase::Pending, UnitPhase::Fetching, UnitPhase::Cancelled]
        );
        assert_eq!(ctx.stats().requests, 0);
        assert!(results.is_empty());
    }
}
