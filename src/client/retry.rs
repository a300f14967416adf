//! Backoff policy and the run-scoped state shared by all request units.

use crate::client::error::FetchError;
use bon::Builder;
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How transient failures are retried.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`, plus up to `jitter * delay` of random jitter.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    #[builder(default = 5)]
    pub max_retries: u32,
    #[builder(default = Duration::from_millis(200))]
    pub base_delay: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter, clamped to `0.0..=1.0`; non-finite values disable jitter.
    #[builder(default = 0.25)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Exponential delay for retry `attempt` without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Delay to wait before retry `attempt`. A server-provided `retry_after`
    /// replaces the computed backoff, bounded by `max_delay`.
    pub fn delay_for<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_delay);
        }
        let base = self.backoff(attempt);
        let fraction = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let spread = base.mul_f64(fraction);
        let jitter = spread.mul_f64(rng.gen::<f64>());
        (base + jitter).min(self.max_delay)
    }

    /// `true` if another attempt is allowed after `attempt` attempts failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Counters reported in the job summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchStats {
    pub requests: u32,
    pub retries: u32,
    pub backoff_sleeps: u32,
    pub rate_limited: u32,
}

/// State shared by every unit of one run: the backoff counters, the random
/// source for jitter and the rate gate.
///
/// It is created at job start and dropped at job end, so concurrent runs
/// (and concurrent tests) never share it.
pub struct FetchContext {
    policy: RetryPolicy,
    resume_at: Mutex<Option<Instant>>,
    rng: StdMutex<StdRng>,
    requests: AtomicU32,
    retries: AtomicU32,
    backoff_sleeps: AtomicU32,
    rate_limited: AtomicU32,
}

impl FetchContext {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Deterministic jitter, used by tests and benches.
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: RetryPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            resume_at: Mutex::new(None),
            rng: StdMutex::new(rng),
            requests: AtomicU32::new(0),
            retries: AtomicU32::new(0),
            backoff_sleeps: AtomicU32::new(0),
            rate_limited: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The instant before which no unit may send a request, if one is set
    /// and still in the future.
    pub async fn gate_deadline(&self) -> Option<Instant> {
        let resume_at = self.resume_at.lock().await;
        resume_at.filter(|at| *at > Instant::now())
    }

    /// Holds back every unit until `delay` from now (never shortens an
    /// existing pause).
    pub async fn pause_all(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut resume_at = self.resume_at.lock().await;
        if resume_at.map_or(true, |current| current < until) {
            *resume_at = Some(until);
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Computes the wait before retry `attempt` after `error` and counts it.
    pub async fn schedule_retry(&self, attempt: u32, error: &FetchError) -> Duration {
        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.policy.delay_for(attempt, error.retry_after(), &mut *rng)
        };
        self.retries.fetch_add(1, Ordering::Relaxed);
        if matches!(error, FetchError::RateLimited { .. }) {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
            warn!("Provider rate limit hit, pausing all requests for {:?}", delay);
            self.pause_all(delay).await;
        }
        delay
    }

    pub fn record_backoff_sleep(&self) {
        self.backoff_sleeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            backoff_sleeps: self.backoff_sleeps.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(1))
            .jitter(0.5)
            .max_retries(3)
            .build()
    }

    #[test]
    fn test_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.base_delay, Duration::from_millis(200));
        assert_eq!(p.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
        assert_eq!(p.backoff(5), Duration::from_secs(1));
        assert_eq!(p.backoff(200), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=4 {
            let base = p.backoff(attempt);
            for _ in 0..50 {
                let d = p.delay_for(attempt, None, &mut rng);
                assert!(d >= base.min(p.max_delay));
                assert!(d <= (base + base.mul_f64(0.5)).min(p.max_delay));
            }
        }
    }

    #[test]
    fn test_non_finite_jitter_falls_back_to_plain_backoff() {
        let mut rng = StdRng::seed_from_u64(3);
        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let p = RetryPolicy::builder()
                .base_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(1))
                .jitter(jitter)
                .build();
            assert_eq!(p.delay_for(1, None, &mut rng), Duration::from_millis(100));
            assert_eq!(p.delay_for(3, None, &mut rng), Duration::from_millis(400));
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            p.delay_for(1, Some(Duration::from_millis(650)), &mut rng),
            Duration::from_millis(650)
        );
        assert_eq!(
            p.delay_for(1, Some(Duration::from_secs(120)), &mut rng),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_retry_budget() {
        let p = policy();
        assert!(p.allows_retry(1));
        assert!(p.allows_retry(3));
        assert!(!p.allows_retry(4));
        let none = RetryPolicy::builder().max_retries(0).build();
        assert!(!none.allows_retry(1));
    }

    #[tokio::test]
    async fn test_rate_limit_pauses_every_unit() {
        let ctx = FetchContext::with_seed(policy(), 3);
        assert!(ctx.gate_deadline().await.is_none());

        let err = FetchError::RateLimited {
            url: "http://x".into(),
            retry_after: Some(Duration::from_millis(500)),
        };
        let delay = ctx.schedule_retry(1, &err).await;
        assert_eq!(delay, Duration::from_millis(500));
        assert!(ctx.gate_deadline().await.is_some());

        // a shorter pause does not shorten the gate
        let before = ctx.gate_deadline().await;
        ctx.pause_all(Duration::from_millis(1)).await;
        assert_eq!(ctx.gate_deadline().await, before);

        let stats = ctx.stats();
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.backoff_sleeps, 0);
    }
}
