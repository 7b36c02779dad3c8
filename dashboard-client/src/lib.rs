//! HTTP access to the mention dashboard backend.
//!
//! [`DashboardApiClient`] implements [`triage_core::TriageApi`], so the
//! engine never sees URLs or status codes. Reads are retried with backoff
//! behind a circuit breaker; mutations are sent exactly once.

pub mod api;
pub mod metrics;
pub mod retry;

pub use api::DashboardApiClient;
pub use metrics::{ClientMetrics, MetricsCollector, RequestOutcome, RequestRecord, RouteStats};
pub use retry::{CircuitBreaker, CircuitState, RetryConfig, RetryExecutor, RetryStats};

#[cfg(test)]
mod tests;
