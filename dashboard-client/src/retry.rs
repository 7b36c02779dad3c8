//! Backoff and circuit breaking for read requests.
//!
//! Mutations never go through here: a failed change is rolled back by the
//! engine and retried by the user, so repeating it automatically would only
//! race with that rollback.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use triage_core::{ApiConfig, CoreError, DashboardApiError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the computed delay added as random jitter (0.0 to 1.0).
    pub jitter_factor: f64,
    /// Consecutive failed operations before the breaker opens.
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ApiConfig> for RetryConfig {
    fn from(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Stops hammering a server that keeps failing; after `recovery_timeout`
/// a single trial request decides whether to close again. Other callers
/// stay blocked while the trial is running.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    /// Set while the half-open trial request is out.
    trial_started: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            trial_started: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                // a trial whose caller went away must not block forever
                let abandoned = self
                    .trial_started
                    .map_or(true, |started| started.elapsed() >= self.recovery_timeout);
                if abandoned {
                    self.trial_started = Some(Instant::now());
                }
                abandoned
            }
            CircuitState::Open { since } if since.elapsed() >= self.recovery_timeout => {
                debug!("Circuit breaker half-open, letting one trial request through");
                self.state = CircuitState::HalfOpen;
                self.trial_started = Some(Instant::now());
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            info!("Dashboard server recovered, closing circuit breaker");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.trial_started = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.trial_started = None;
        match self.state {
            CircuitState::HalfOpen => {
                warn!("Recovery trial failed, circuit breaker open again");
                self.state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(
                    "Opening circuit breaker after {} consecutive failures",
                    self.consecutive_failures
                );
                self.state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Backoff,
    /// The server said how long to wait.
    After(Duration),
    GiveUp,
}

pub fn retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::DashboardApi(api_error) => match api_error {
            DashboardApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::After(Duration::from_secs(*retry_after))
            }
            DashboardApiError::ServerError { .. }
            | DashboardApiError::RequestTimeout
            | DashboardApiError::EndpointUnavailable { .. } => RetryStrategy::Backoff,
            DashboardApiError::Unauthorized { .. }
            | DashboardApiError::Forbidden { .. }
            | DashboardApiError::NotFound { .. }
            | DashboardApiError::Rejected { .. }
            | DashboardApiError::InvalidResponse { .. }
            | DashboardApiError::CircuitOpen => RetryStrategy::GiveUp,
        },
        CoreError::Network(error) if error.is_timeout() || error.is_connect() => {
            RetryStrategy::Backoff
        }
        _ => RetryStrategy::GiveUp,
    }
}

/// Exponential backoff for the given zero-based attempt, plus jitter, capped
/// at `max_delay_ms`.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponential = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = exponential.min(config.max_delay_ms as f64) as u64;
    let jitter_range = (capped as f64 * config.jitter_factor.clamp(0.0, 1.0)) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    Duration::from_millis(capped.saturating_add(jitter).min(config.max_delay_ms))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Extra attempts made after a first failure.
    pub retries: u64,
    pub recovered: u64,
    pub exhausted: u64,
    pub blocked_by_breaker: u64,
}

#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    breaker: Mutex<CircuitBreaker>,
    stats: Mutex<RetryStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.recovery_timeout);
        Self {
            config,
            breaker: Mutex::new(breaker),
            stats: Mutex::new(RetryStats::default()),
        }
    }

    /// Runs `operation` until it succeeds, fails permanently or runs out of
    /// attempts. The error of the last attempt is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        if !lock(&self.breaker).allow_request() {
            lock(&self.stats).blocked_by_breaker += 1;
            warn!("Circuit breaker open, skipping {}", operation_name);
            return Err(CoreError::DashboardApi(DashboardApiError::CircuitOpen));
        }

        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    lock(&self.breaker).record_success();
                    if attempt > 0 {
                        let mut stats = lock(&self.stats);
                        stats.retries += u64::from(attempt);
                        stats.recovered += 1;
                        info!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let last_attempt = attempt + 1 >= self.config.max_attempts;
            let delay = match retry_strategy(&error) {
                RetryStrategy::GiveUp => None,
                _ if last_attempt => None,
                RetryStrategy::Backoff => Some(backoff_delay(attempt, &self.config)),
                RetryStrategy::After(delay) => {
                    Some(delay.min(Duration::from_millis(self.config.max_delay_ms)))
                }
            };

            let Some(delay) = delay else {
                lock(&self.breaker).record_failure();
                let mut stats = lock(&self.stats);
                stats.retries += u64::from(attempt);
                stats.exhausted += 1;
                debug!(
                    "{} failed after {} attempt(s): {}",
                    operation_name,
                    attempt + 1,
                    error
                );
                return Err(error);
            };

            info!("Retrying {} in {:?}: {}", operation_name, delay, error);
            sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn stats(&self) -> RetryStats {
        lock(&self.stats).clone()
    }

    pub fn circuit_state(&self) -> CircuitState {
        lock(&self.breaker).state()
    }
}
