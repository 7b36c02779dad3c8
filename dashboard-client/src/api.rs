use crate::metrics::{ClientMetrics, MetricsCollector, RequestOutcome, RequestRecord};
use crate::retry::{CircuitState, RetryConfig, RetryExecutor, RetryStats};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use triage_core::{
    ApiConfig, ConfigError, CoreError, DashboardApiError, DashboardData, MembershipChange,
    Mutation, SetKey, TriageApi,
};
use url::Url;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// One outgoing mutation call, before the base URL is applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MutationRequest {
    pub method: Method,
    /// Metrics label, e.g. `DELETE /keywords/{keyword}`.
    pub route: &'static str,
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl MutationRequest {
    pub fn for_mutation(mutation: &Mutation) -> Self {
        let value = mutation.value.clone();
        match (mutation.target, mutation.change) {
            (SetKey::Triage(_), _) => {
                let operation = mutation.operation();
                Self {
                    method: Method::POST,
                    route: triage_route(operation),
                    segments: vec![operation.to_string()],
                    body: Some(json!({ "id": value })),
                }
            }
            (SetKey::MonitoredSubreddits, MembershipChange::Add) => Self {
                method: Method::POST,
                route: "POST /monitored-subreddits",
                segments: vec!["monitored-subreddits".to_string()],
                body: Some(json!({ "subreddit": value })),
            },
            (SetKey::MonitoredSubreddits, MembershipChange::Remove) => Self {
                method: Method::DELETE,
                route: "DELETE /monitored-subreddits/{subreddit}",
                segments: vec!["monitored-subreddits".to_string(), value],
                body: None,
            },
            (SetKey::Keywords, MembershipChange::Add) => Self {
                method: Method::POST,
                route: "POST /keywords",
                segments: vec!["keywords".to_string()],
                body: Some(json!({ "keyword": value })),
            },
            (SetKey::Keywords, MembershipChange::Remove) => Self {
                method: Method::DELETE,
                route: "DELETE /keywords/{keyword}",
                segments: vec!["keywords".to_string(), value],
                body: None,
            },
        }
    }
}

fn triage_route(operation: &str) -> &'static str {
    match operation {
        "flag" => "POST /flag",
        "unflag" => "POST /unflag",
        "ignore" => "POST /ignore",
        "unignore" => "POST /unignore",
        "engage" => "POST /engage",
        _ => "POST /unengage",
    }
}

#[derive(Debug, Deserialize)]
struct MutationResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Reads a mutation answer. Anything that is not a `{"success": ...}`
/// object counts as success since the status was already 2xx.
pub(crate) fn interpret_mutation_body(route: &str, body: &[u8]) -> Result<(), CoreError> {
    match serde_json::from_slice::<MutationResponse>(body) {
        Ok(MutationResponse { success: true, .. }) => Ok(()),
        Ok(MutationResponse {
            success: false,
            error,
        }) => Err(CoreError::DashboardApi(DashboardApiError::Rejected {
            endpoint: route.to_string(),
            reason: error.unwrap_or_else(|| "server reported failure".to_string()),
        })),
        Err(_) => {
            debug!("{} answered without a status object, assuming success", route);
            Ok(())
        }
    }
}

fn retry_after_secs(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Maps a non-2xx status onto the error the engine and the retry policy
/// understand.
fn status_error(route: &str, status: StatusCode, retry_after: u64) -> DashboardApiError {
    match status.as_u16() {
        401 => DashboardApiError::Unauthorized {
            endpoint: route.to_string(),
        },
        403 => DashboardApiError::Forbidden {
            resource: route.to_string(),
        },
        404 => DashboardApiError::NotFound {
            resource: route.to_string(),
        },
        408 => DashboardApiError::RequestTimeout,
        429 => DashboardApiError::RateLimitExceeded { retry_after },
        502 | 503 => DashboardApiError::EndpointUnavailable {
            endpoint: route.to_string(),
        },
        code if status.is_server_error() => DashboardApiError::ServerError { status_code: code },
        code => DashboardApiError::Rejected {
            endpoint: route.to_string(),
            reason: format!("HTTP {}", code),
        },
    }
}

/// HTTP implementation of [`TriageApi`] against the dashboard backend.
#[derive(Debug)]
pub struct DashboardApiClient {
    http_client: Client,
    base_url: Url,
    retry: RetryExecutor,
    metrics: MetricsCollector,
}

impl DashboardApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, CoreError> {
        let base_url = Url::parse(&config.base_url).map_err(|_| ConfigError::InvalidValue {
            field: "api.base_url".to_string(),
            value: config.base_url.clone(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                field: "api.base_url".to_string(),
                value: config.base_url.clone(),
            }
            .into());
        }

        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()?;

        info!("Dashboard API client targeting {}", base_url);
        Ok(Self {
            http_client,
            base_url,
            retry: RetryExecutor::new(RetryConfig::from(config)),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    pub fn endpoint_url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, CoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidValue {
                field: "api.base_url".to_string(),
                value: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn make_request(
        &self,
        method: Method,
        route: &str,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, CoreError> {
        let start_time = Instant::now();

        let mut request_builder = self.http_client.request(method, url);
        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }

        debug!("Sending {}", route);
        let (result, status_code, rate_limited) = match request_builder.send().await {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16();
                (Ok(response), Some(status), false)
            }
            Ok(response) => {
                let status = response.status();
                let api_error = status_error(route, status, retry_after_secs(&response));
                error!("{} failed with status {}", route, status);
                let rate_limited = matches!(api_error, DashboardApiError::RateLimitExceeded { .. });
                (
                    Err(CoreError::DashboardApi(api_error)),
                    Some(status.as_u16()),
                    rate_limited,
                )
            }
            Err(e) => {
                error!("Network error for {}: {}", route, e);
                let error = if e.is_timeout() {
                    CoreError::DashboardApi(DashboardApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                };
                (Err(error), None, false)
            }
        };

        let outcome = match (&result, status_code) {
            (Ok(_), _) => RequestOutcome::Success,
            (Err(_), Some(_)) => RequestOutcome::HttpError,
            (Err(_), None) => RequestOutcome::TransportError,
        };
        self.metrics
            .record(RequestRecord {
                route: route.to_string(),
                status_code,
                elapsed: start_time.elapsed(),
                outcome,
                rate_limited,
            })
            .await;

        result
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, route: &'static str) -> Result<T, CoreError> {
        let url = self.endpoint_url(&[path])?;
        let url = &url;
        let client = self;

        self.retry
            .execute(route, move || async move {
                let response = client.make_request(Method::GET, route, url.clone(), None).await?;
                response.json::<T>().await.map_err(|e| {
                    error!("Failed to parse {} response: {}", route, e);
                    CoreError::DashboardApi(DashboardApiError::InvalidResponse {
                        details: format!("Unexpected payload from {}", route),
                    })
                })
            })
            .await
    }

    pub async fn metrics(&self) -> ClientMetrics {
        self.metrics.snapshot().await
    }

    pub async fn export_metrics(&self) -> Result<String, serde_json::Error> {
        self.metrics.export_json().await
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.retry.circuit_state()
    }
}

#[async_trait]
impl TriageApi for DashboardApiClient {
    async fn fetch_dashboard(&self) -> Result<DashboardData, CoreError> {
        let data: DashboardData = self
            .get_json("dashboard-data", "GET /dashboard-data")
            .await?;
        if let Some(message) = &data.error {
            warn!("Dashboard endpoint reported an error: {}", message);
            return Err(CoreError::DashboardApi(DashboardApiError::InvalidResponse {
                details: message.clone(),
            }));
        }
        info!("Fetched dashboard data with {} posts", data.posts.len());
        Ok(data)
    }

    async fn fetch_recent_mentions(&self) -> Result<DashboardData, CoreError> {
        let data: DashboardData = self
            .get_json("recent-mentions", "GET /recent-mentions")
            .await?;
        info!("Fetched {} recent mentions", data.posts.len());
        Ok(data)
    }

    async fn fetch_flagged(&self) -> Result<Vec<String>, CoreError> {
        self.get_json("flagged", "GET /flagged").await
    }

    async fn fetch_monitored_subreddits(&self) -> Result<Vec<String>, CoreError> {
        self.get_json("monitored-subreddits", "GET /monitored-subreddits")
            .await
    }

    async fn fetch_keywords(&self) -> Result<Vec<String>, CoreError> {
        self.get_json("keywords", "GET /keywords").await
    }

    async fn apply_mutation(&self, mutation: &Mutation) -> Result<(), CoreError> {
        let request = MutationRequest::for_mutation(mutation);
        let url = self.endpoint_url(request.segments.as_slice())?;

        let response = self
            .make_request(request.method, request.route, url, request.body.as_ref())
            .await?;
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not read {} response body: {}", request.route, e);
                Default::default()
            }
        };

        let result = interpret_mutation_body(request.route, &body);
        if result.is_err() {
            self.metrics.record_rejection().await;
        } else {
            debug!("{} accepted", mutation);
        }
        result
    }
}
