//! Circuit breaker for calls to a remote dependency.
//!
//! Closed: calls pass, outcomes are recorded in a rolling window. The
//! breaker opens when, inside the window, failures reach the threshold and
//! make up at least the configured ratio of calls.
//!
//! Open: calls fail fast until the reset timeout elapses, then the breaker
//! turns half-open.
//!
//! Half-open: exactly one trial call is admitted. Success closes the
//! breaker and clears the window; failure opens it again.
//!
//! Every admitted call is bounded by the call timeout, and a timeout counts
//! as a failure.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub call_timeout: Duration,
    pub failure_ratio: f64,
    pub failure_threshold: u32,
    pub rolling_window: Duration,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(1),
            failure_ratio: 0.5,
            failure_threshold: 5,
            rolling_window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Short-circuited without calling the dependency.
    #[error("Circuit breaker is open")]
    Open,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Call failed: {0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }
}

struct Inner {
    state: BreakerState,
    // (when, succeeded) for calls completed while closed.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> usize {
        self.window.iter().filter(|(_, ok)| !ok).count()
    }
}

/// Process-local breaker, cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: BreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                last_failure_at: None,
                trial_in_flight: false,
            })),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. An open breaker whose reset timeout has elapsed
    /// reports half-open.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner, Instant::now());
        inner.state
    }

    /// Failures recorded in the current window.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.lock();
        inner.prune(Instant::now(), self.config.rolling_window);
        inner.failures()
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.lock().last_failure_at
    }

    /// Asks to make one call. The permit must be settled with
    /// [`Permit::success`] or [`Permit::failure`]; dropping it unsettled
    /// records a failure.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner, Instant::now());

        match inner.state {
            BreakerState::Closed => Some(Permit::new(self.clone(), false)),
            BreakerState::Open => None,
            BreakerState::HalfOpen if inner.trial_in_flight => None,
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                tracing::debug!(breaker = %self.name, "admitting trial call");
                Some(Permit::new(self.clone(), true))
            }
        }
    }

    /// Runs `call` under the breaker and the call timeout.
    pub async fn call<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(BreakerError::Open)?;

        match tokio::time::timeout(self.config.call_timeout, call()).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure();
                Err(BreakerError::Inner(e))
            }
            Err(_elapsed) => {
                permit.failure();
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_half_open(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open
            && inner
                .opened_at
                .is_some_and(|at| now.duration_since(at) >= self.config.reset_timeout)
        {
            self.transition(inner, BreakerState::HalfOpen, now);
        }
    }

    fn record(&self, trial: bool, succeeded: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        if !succeeded {
            inner.last_failure_at = Some(now);
        }

        if trial {
            inner.trial_in_flight = false;
            if inner.state == BreakerState::HalfOpen {
                let to = if succeeded {
                    BreakerState::Closed
                } else {
                    BreakerState::Open
                };
                self.transition(&mut inner, to, now);
            }
            return;
        }

        // Outcomes of calls admitted before the breaker opened are ignored.
        if inner.state != BreakerState::Closed {
            return;
        }

        inner.window.push_back((now, succeeded));
        inner.prune(now, self.config.rolling_window);

        let failures = inner.failures();
        let calls = inner.window.len();
        if !succeeded
            && failures >= self.config.failure_threshold as usize
            && failures as f64 / calls as f64 >= self.config.failure_ratio
        {
            self.transition(&mut inner, BreakerState::Open, now);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(now);
                tracing::warn!(breaker = %self.name, %from, "circuit breaker opened");
            }
            BreakerState::HalfOpen => {
                tracing::info!(breaker = %self.name, "circuit breaker half-open, testing downstream");
            }
            BreakerState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
                tracing::info!(breaker = %self.name, %from, "circuit breaker closed");
            }
        }
        metrics::counter!("breaker_transitions_total", "to" => to.as_str()).increment(1);
    }
}

/// Admission for one call through a [`CircuitBreaker`].
#[must_use = "a dropped permit counts as a failure"]
pub struct Permit {
    breaker: CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit {
    fn new(breaker: CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record(self.trial, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record(self.trial, false);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.trial, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            call_timeout: Duration::from_millis(100),
            failure_ratio: 0.5,
            failure_threshold: 3,
            rolling_window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(5),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> BreakerError<&'static str> {
        breaker
            .call(|| async { Err::<(), _>("boom") })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.call(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", config());

        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(succeed(&breaker).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn ratio_below_threshold_stays_closed() {
        let breaker = CircuitBreaker::new("test", config());

        for _ in 0..4 {
            succeed(&breaker).await.unwrap();
        }
        for _ in 0..3 {
            fail(&breaker).await;
        }

        // 3 of 7 failed, under the 50% ratio.
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn old_failures_leave_the_window() {
        let breaker = CircuitBreaker::new("test", config());

        fail(&breaker).await;
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        fail(&breaker).await;

        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("test", config());

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout(_))));
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_trial() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert!(breaker.try_acquire().is_none());

        trial.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(5)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_permit_reopens() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = breaker.try_acquire().unwrap();
        drop(trial);

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.last_failure_at().is_some());
    }
}
