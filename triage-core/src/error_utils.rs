use crate::error::*;
use std::time::Duration;
use tracing::{error, info, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::DashboardApi(e) => {
                error!("Dashboard API error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            CoreError::FetchFailed { source, .. } | CoreError::MutationFailed { source, .. } => {
                error!("Caused by: {:?}", source);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::DashboardApi(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CoreError::FetchFailed { source, .. } | CoreError::MutationFailed { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::DashboardApi(e) => e.retry_after(),
            CoreError::FetchFailed { source, .. } | CoreError::MutationFailed { source, .. } => {
                source.retry_after()
            }
            _ if self.is_retryable() => Some(Duration::from_secs(5)), // Default retry delay
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::DashboardApi(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::FetchFailed { resource, source } => format!(
                "Could not load {}. Showing the last known data. {}",
                resource,
                source.user_friendly_message()
            ),
            CoreError::MutationFailed { operation, source } => format!(
                "Could not {}; the change was reverted. {}",
                operation.replace('_', " "),
                source.user_friendly_message()
            ),
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::DashboardApi(_) => "DASHBOARD_API".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::FetchFailed { .. } => "FETCH_FAILED".to_string(),
            CoreError::MutationFailed { .. } => "MUTATION_FAILED".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
        }
    }
}

impl ErrorExt for DashboardApiError {
    fn log_error(&self) -> &Self {
        error!("DashboardApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("DashboardApiError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            DashboardApiError::RateLimitExceeded { .. } => true,
            DashboardApiError::RequestTimeout => true,
            DashboardApiError::ServerError { status_code } => *status_code >= 500,
            DashboardApiError::EndpointUnavailable { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DashboardApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(Duration::from_secs(30)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            DashboardApiError::Unauthorized { .. } => {
                "Your session is not authorized. Please sign in again.".to_string()
            }
            DashboardApiError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after
            ),
            DashboardApiError::Forbidden { resource } => {
                format!("Access denied to {}.", resource)
            }
            DashboardApiError::NotFound { resource } => format!("Could not find: {}", resource),
            DashboardApiError::Rejected { reason, .. } => {
                format!("The server rejected the request: {}", reason)
            }
            DashboardApiError::RequestTimeout => {
                "Request to the dashboard service timed out. Please try again.".to_string()
            }
            DashboardApiError::CircuitOpen => {
                "The dashboard service is failing repeatedly. Please wait a moment.".to_string()
            }
            _ => "Dashboard service error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            DashboardApiError::Unauthorized { .. } => "API_UNAUTHORIZED".to_string(),
            DashboardApiError::RateLimitExceeded { .. } => "API_RATE_LIMIT".to_string(),
            DashboardApiError::Forbidden { .. } => "API_FORBIDDEN".to_string(),
            DashboardApiError::NotFound { .. } => "API_NOT_FOUND".to_string(),
            DashboardApiError::Rejected { .. } => "API_REJECTED".to_string(),
            DashboardApiError::EndpointUnavailable { .. } => "API_ENDPOINT_UNAVAILABLE".to_string(),
            DashboardApiError::RequestTimeout => "API_TIMEOUT".to_string(),
            DashboardApiError::InvalidResponse { .. } => "API_INVALID_RESPONSE".to_string(),
            DashboardApiError::ServerError { .. } => "API_SERVER_ERROR".to_string(),
            DashboardApiError::CircuitOpen => "API_CIRCUIT_OPEN".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false // Config errors need user intervention
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::InvalidFormat { .. } | ConfigError::Parse(_) => {
                "Configuration file format is invalid. Please check the settings.".to_string()
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::ValidationFailed { reason } => {
                format!("Configuration is invalid: {}", reason)
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::InvalidFormat { .. } => "CONFIG_INVALID_FORMAT".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

pub struct ErrorReporter {
    report_errors: bool,
    report_warnings: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            report_errors: true,
            report_warnings: true,
        }
    }

    pub fn with_error_reporting(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }

    pub fn with_warning_reporting(mut self, enabled: bool) -> Self {
        self.report_warnings = enabled;
        self
    }

    pub fn report_error(&self, error: &CoreError) {
        if self.report_errors {
            error.log_error();
            info!("Error code: {}", error.error_code());
            info!("User message: {}", error.user_friendly_message());
            if error.is_retryable() {
                if let Some(retry_after) = error.retry_after() {
                    info!("Error is retryable. Retry after: {:?}", retry_after);
                }
            }
        }
    }

    pub fn report_warning(&self, error: &CoreError) {
        if self.report_warnings {
            error.log_warn();
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}
