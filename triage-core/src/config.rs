//! Runtime configuration for the dashboard engine and its HTTP collaborator.
//!
//! Everything has a default, so an absent file yields a working local setup
//! pointed at `http://localhost:8000`. `TRIAGE_API_BASE_URL` overrides the
//! base URL after the file is read.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const BASE_URL_ENV: &str = "TRIAGE_API_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub view: ViewConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Attempts per read request; mutations are never retried.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            user_agent: concat!("triage-dashboard/", env!("CARGO_PKG_VERSION")).to_string(),
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Staleness thresholds per cache key, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub mentions_stale_secs: u64,
    pub flagged_stale_secs: u64,
    pub ignored_stale_secs: u64,
    pub engaged_stale_secs: u64,
    pub subreddits_stale_secs: u64,
    pub keywords_stale_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mentions_stale_secs: 2 * 60,
            flagged_stale_secs: 5 * 60,
            ignored_stale_secs: 5 * 60,
            engaged_stale_secs: 5 * 60,
            subreddits_stale_secs: 5 * 60,
            keywords_stale_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub page_size: usize,
    /// Cosmetic pause before a "load more" takes effect.
    pub load_more_delay_ms: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            load_more_delay_ms: 0,
        }
    }
}

impl DashboardConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DashboardConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` if given, falls back to defaults otherwise, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|_| {
                    ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    }
                })?;
                info!("Loading configuration from {}", path.display());
                toml::from_str::<DashboardConfig>(&contents)?
            }
            None => {
                debug!("No configuration file given, using defaults");
                DashboardConfig::default()
            }
        };

        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            debug!("{} overrides api.base_url", BASE_URL_ENV);
            config.api.base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.api.base_url).map_err(|_| ConfigError::InvalidValue {
            field: "api.base_url".to_string(),
            value: self.api.base_url.clone(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "api.base_url".to_string(),
                value: self.api.base_url.clone(),
            });
        }
        if self.api.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "api.max_attempts must be at least 1".to_string(),
            });
        }
        if self.view.page_size == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "view.page_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
