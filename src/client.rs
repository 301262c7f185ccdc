use crate::error::{Result, SurveillanceError};
use reqwest::blocking::{Client, ClientBuilder};
use std::time::Duration;
use url::Url;

/// Production API endpoint used when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "https://api-bf-dengue-survey-production.up.railway.app";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

pub const ENV_API_URL: &str = "APPI_API_URL";
pub const ENV_API_KEY: &str = "APPI_API_KEY";
pub const ENV_DEBUG: &str = "APPI_DEBUG";
pub const ENV_TIMEOUT: &str = "APPI_TIMEOUT";
pub const ENV_RETRY_ATTEMPTS: &str = "APPI_RETRY_ATTEMPTS";
pub const ENV_RETRY_DELAY: &str = "APPI_RETRY_DELAY";

const USER_AGENT: &str = concat!("dengsurv/", env!("CARGO_PKG_VERSION"));

/// Create the blocking HTTP client used by the default transport
pub fn create_http_client(config: &ClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .timeout(config.timeout)
        .connect_timeout(config.timeout.min(Duration::from_secs(10)))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| {
            SurveillanceError::configuration(format!("failed to create HTTP client: {}", e), None)
        })
}

/// Configuration for the surveillance API client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, stored without trailing slash
    pub base_url: String,
    /// API key, sent as bearer credential when no login token is held
    pub api_key: Option<String>,
    /// Initial bearer token
    pub token: Option<String>,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Extra attempts allowed after a transient failure
    pub retry_count: u32,
    /// First retry delay; doubled on each further attempt
    pub backoff_base: Duration,
    /// Randomize retry delays
    pub jitter: bool,
    /// Enable debug logging
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            token: None,
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            jitter: false,
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given base URL with default settings
    pub fn new(base_url: &str) -> Result<Self> {
        let config = ClientConfig::default().with_base_url(base_url);
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self> {
        ClientConfig::default().with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay the `APPI_*` variables found through `lookup` onto this configuration.
    ///
    /// Absent variables keep the current values. A numeric variable that is set
    /// but cannot be parsed is a configuration error.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var(ENV_API_URL) {
            self = self.with_base_url(&url);
        }
        if let Some(key) = var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(flag) = var(ENV_DEBUG) {
            self.debug = parse_flag(&flag);
        }
        if let Some(raw) = var(ENV_TIMEOUT) {
            self.timeout = parse_seconds(ENV_TIMEOUT, &raw)?;
        }
        if let Some(raw) = var(ENV_RETRY_ATTEMPTS) {
            self.retry_count = raw.trim().parse().map_err(|_| {
                SurveillanceError::configuration(
                    format!("{} must be a non-negative integer, got {:?}", ENV_RETRY_ATTEMPTS, raw),
                    Some(ENV_RETRY_ATTEMPTS),
                )
            })?;
        }
        if let Some(raw) = var(ENV_RETRY_DELAY) {
            self.backoff_base = parse_seconds(ENV_RETRY_DELAY, &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Set the base URL; trailing slashes are removed
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim().trim_end_matches('/').to_string();
        self
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the initial bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many times a transient failure is retried
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the first retry delay
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Randomize retry delays
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Check that the configuration can be used to build a client
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(SurveillanceError::configuration(
                "base URL must not be empty",
                Some("base_url"),
            ));
        }
        let url = Url::parse(&self.base_url).map_err(|e| {
            SurveillanceError::configuration(
                format!("invalid base URL {:?}: {}", self.base_url, e),
                Some("base_url"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(SurveillanceError::configuration(
                format!("base URL must be an absolute http(s) URL, got {:?}", self.base_url),
                Some("base_url"),
            ));
        }
        if self.timeout.is_zero() {
            return Err(SurveillanceError::configuration(
                "timeout must be positive",
                Some("timeout"),
            ));
        }
        if self.backoff_base.is_zero() {
            return Err(SurveillanceError::configuration(
                "retry backoff must be positive",
                Some("backoff_base"),
            ));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration> {
    let invalid = || {
        SurveillanceError::configuration(
            format!("{} must be a positive number of seconds, got {:?}", key, raw),
            Some(key),
        )
    };
    let secs: f64 = raw.trim().parse().map_err(|_| invalid())?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs_f64(secs))
}
