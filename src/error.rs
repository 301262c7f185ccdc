use thiserror::Error;

/// Main error type for surveillance API operations
#[derive(Debug, Error)]
pub enum SurveillanceError {
    /// Invalid local setup (bad base URL, unparsable environment override)
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    /// No network path to the server (DNS, refused, reset)
    #[error("connection error for {url}: {message}")]
    Connection { message: String, url: String },

    /// The configured timeout elapsed before a response arrived
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout {
        url: String,
        timeout: std::time::Duration,
    },

    /// HTTP 429
    #[error("rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    /// HTTP 401/403, or credentials rejected during login
    #[error("authentication error: {message}")]
    Authentication {
        message: String,
        status: Option<u16>,
    },

    /// Malformed input or unexpected response shape
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Any other server-side failure
    #[error("API error {status} on {endpoint}: {message}")]
    Api {
        status: u16,
        message: String,
        endpoint: String,
        detail: Option<serde_json::Value>,
    },

    /// A transient failure persisted through every allowed attempt
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SurveillanceError>,
    },

    /// Analysis could not be carried out on the given data
    #[error("analysis error: {0}")]
    Analysis(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SurveillanceError {
    /// Configuration error, optionally naming the offending key
    pub fn configuration(message: impl Into<String>, key: Option<&str>) -> Self {
        SurveillanceError::Configuration {
            message: message.into(),
            key: key.map(str::to_string),
        }
    }

    /// Validation error, optionally naming the offending field
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        SurveillanceError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Build the error matching an HTTP status and its decoded error body.
    ///
    /// `detail` is the server's `{"detail": ...}` payload when there was one.
    pub fn from_status(status: u16, endpoint: &str, body: Option<&serde_json::Value>) -> Self {
        let detail = body.and_then(|b| b.get("detail")).cloned();
        let message = match &detail {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("HTTP error {}", status),
        };

        match status {
            401 | 403 => SurveillanceError::Authentication {
                message,
                status: Some(status),
            },
            429 => SurveillanceError::RateLimit {
                message,
                retry_after: body
                    .and_then(|b| b.get("retry_after"))
                    .and_then(|v| v.as_u64()),
            },
            _ => SurveillanceError::Api {
                status,
                message,
                endpoint: endpoint.to_string(),
                detail,
            },
        }
    }

    /// The error that caused retry exhaustion, or `self` for every other kind
    pub fn root(&self) -> &SurveillanceError {
        match self {
            SurveillanceError::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether another attempt may succeed: connection loss, timeouts and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            SurveillanceError::Connection { .. } | SurveillanceError::Timeout { .. } => true,
            SurveillanceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if the server rejected the credentials
    pub fn is_authentication(&self) -> bool {
        matches!(self.root(), SurveillanceError::Authentication { .. })
    }

    /// Check if the server throttled the request
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.root(), SurveillanceError::RateLimit { .. })
    }

    /// Check if the request timed out, looking through retry exhaustion
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), SurveillanceError::Timeout { .. })
    }

    /// Check if this error is a not found error (404)
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), SurveillanceError::Api { status: 404, .. })
    }

    /// Get the HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self.root() {
            SurveillanceError::Api { status, .. } => Some(*status),
            SurveillanceError::Authentication { status, .. } => *status,
            SurveillanceError::RateLimit { .. } => Some(429),
            _ => None,
        }
    }
}

/// Result type for surveillance API operations
pub type Result<T> = std::result::Result<T, SurveillanceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_status_maps_auth_and_rate_limit() {
        let body = json!({"detail": "Incorrect email or password"});
        let err = SurveillanceError::from_status(401, "/login", Some(&body));
        assert!(err.is_authentication());
        assert_eq!(err.status_code(), Some(401));
        assert!(err.to_string().contains("Incorrect email"));

        let body = json!({"detail": "slow down", "retry_after": 12});
        match SurveillanceError::from_status(429, "/api/data", Some(&body)) {
            SurveillanceError::RateLimit { retry_after, .. } => assert_eq!(retry_after, Some(12)),
            other => panic!("expected RateLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_from_status_api_error() {
        let err = SurveillanceError::from_status(404, "/api/regions", None);
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "API error 404 on /api/regions: HTTP error 404");

        let err = SurveillanceError::from_status(503, "/api/regions", None);
        assert!(err.is_transient());
    }

    #[test]
    fn test_root_unwraps_retry_exhaustion() {
        let err = SurveillanceError::RetriesExhausted {
            attempts: 3,
            source: Box::new(SurveillanceError::Timeout {
                url: "https://api.example.com/export-data".to_string(),
                timeout: std::time::Duration::from_secs(30),
            }),
        };
        assert!(err.is_timeout());
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with("giving up after 3 attempts"));
    }
}
