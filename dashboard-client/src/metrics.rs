use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    HttpError,
    TransportError,
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Route template such as `DELETE /keywords/{keyword}`, so metrics do not
    /// split per value.
    pub route: String,
    pub status_code: Option<u16>,
    pub elapsed: Duration,
    pub outcome: RequestOutcome,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_time_ms: u64,
    pub slowest_ms: u64,
    pub last_status: Option<u16>,
}

impl RouteStats {
    fn record(&mut self, record: &RequestRecord) {
        let elapsed_ms = record.elapsed.as_millis() as u64;
        self.requests += 1;
        self.total_time_ms += elapsed_ms;
        self.slowest_ms = self.slowest_ms.max(elapsed_ms);
        self.last_status = record.status_code;
        if record.outcome == RequestOutcome::Success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.requests as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rejected_mutations: u64,
    pub http_errors: u64,
    pub transport_errors: u64,
    pub rate_limited_requests: u64,
    pub last_request_at: Option<SystemTime>,
    pub routes: BTreeMap<String, RouteStats>,
}

impl ClientMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Request bookkeeping for one client instance.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: RwLock<ClientMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, record: RequestRecord) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.last_request_at = Some(SystemTime::now());
        match record.outcome {
            RequestOutcome::Success => metrics.successful_requests += 1,
            RequestOutcome::HttpError => metrics.http_errors += 1,
            RequestOutcome::TransportError => metrics.transport_errors += 1,
        }
        if record.rate_limited {
            metrics.rate_limited_requests += 1;
        }
        metrics
            .routes
            .entry(record.route.clone())
            .or_default()
            .record(&record);
    }

    /// A mutation answered 2xx but with `"success": false`. The request
    /// itself was already counted as successful.
    pub async fn record_rejection(&self) {
        self.metrics.write().await.rejected_mutations += 1;
    }

    pub async fn snapshot(&self) -> ClientMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn route(&self, route: &str) -> Option<RouteStats> {
        self.metrics.read().await.routes.get(route).cloned()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = ClientMetrics::default();
    }

    pub async fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot().await)
    }
}
