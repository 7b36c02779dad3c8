use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Dashboard API error: {0}")]
    DashboardApi(#[from] DashboardApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to fetch {resource}: {source}")]
    FetchFailed {
        resource: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Mutation {operation} failed: {source}")]
    MutationFailed {
        operation: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl CoreError {
    pub fn fetch_failed(resource: impl Into<String>, source: CoreError) -> Self {
        CoreError::FetchFailed {
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    pub fn mutation_failed(operation: impl Into<String>, source: CoreError) -> Self {
        CoreError::MutationFailed {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// Transport-level failure, regardless of which call hit it.
    pub fn is_network_error(&self) -> bool {
        match self {
            CoreError::Network(_) => true,
            CoreError::DashboardApi(DashboardApiError::RequestTimeout) => true,
            CoreError::FetchFailed { source, .. } | CoreError::MutationFailed { source, .. } => {
                source.is_network_error()
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum DashboardApiError {
    #[error("Unauthorized request to {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Request to {endpoint} rejected: {reason}")]
    Rejected { endpoint: String, reason: String },

    #[error("API endpoint unavailable: {endpoint}")]
    EndpointUnavailable { endpoint: String },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {details}")]
    InvalidFormat { details: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
