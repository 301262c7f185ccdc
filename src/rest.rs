use crate::account::AccountApi;
use crate::alerts::AlertManager;
use crate::analytics::EpidemiologicalAnalyzer;
use crate::auth::AuthSlot;
use crate::client::ClientConfig;
use crate::data::DataApi;
use crate::error::{Result, SurveillanceError};
use crate::export::DataExporter;
use crate::request::{HttpRequest, RequestSpec};
use crate::response::{error_for_status, normalize, ExpectedKind, Payload, ResponseEnvelope};
use crate::retry::RetryPolicy;
use crate::token::AuthToken;
use crate::transport::{HttpTransport, Transport};
use serde_json::{Map, Value};
use std::time::Instant;
use url::Url;
use uuid::Uuid;

/// Session with the surveillance API.
///
/// Owns the configuration, the transport and the authentication state. Calls
/// block until the server answers; one client may be shared between threads,
/// and separate clients share nothing.
pub struct ApiClient {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
    pub(crate) auth: AuthSlot,
}

impl ApiClient {
    /// Create a client over HTTP with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::from_config(&config)?;
        ApiClient::with_transport(config, Box::new(transport))
    }

    /// Create a client configured from the `APPI_*` environment variables
    pub fn from_env() -> Result<Self> {
        ApiClient::new(ClientConfig::from_env()?)
    }

    /// Create a client that sends its requests through `transport`
    pub fn with_transport(config: ClientConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let initial = config.token.clone().map(AuthToken::new);
        Ok(ApiClient {
            retry: RetryPolicy::from_config(&config),
            auth: AuthSlot::new(initial),
            config,
            transport,
        })
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Case data, indicators and reference lists
    pub fn data(&self) -> DataApi<'_> {
        DataApi::new(self)
    }

    /// Alert logs and thresholds
    pub fn alerts(&self) -> AlertManager<'_> {
        AlertManager::new(self)
    }

    /// File exports
    pub fn exporter(&self) -> DataExporter<'_> {
        DataExporter::new(self)
    }

    /// Time series analysis
    pub fn analyzer(&self) -> EpidemiologicalAnalyzer<'_> {
        EpidemiologicalAnalyzer::new(self)
    }

    /// Profile and password management
    pub fn account(&self) -> AccountApi<'_> {
        AccountApi::new(self)
    }

    /// Absolute URL of an endpoint, query string included
    pub fn endpoint_url(&self, spec: &RequestSpec) -> Result<Url> {
        let path = spec.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{}", self.config.base_url, path))?;
        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(spec.query.iter());
        }
        Ok(url)
    }

    /// Send a request and return the successful response envelope.
    ///
    /// Connection failures, timeouts and 5xx answers are retried with
    /// exponential backoff when the request is retryable; once the attempts
    /// run out the last error is returned inside
    /// [`SurveillanceError::RetriesExhausted`]. Rate limiting and
    /// authentication failures are returned at once.
    pub fn execute(&self, spec: &RequestSpec) -> Result<ResponseEnvelope> {
        let url = self.endpoint_url(spec)?;
        let request_id = Uuid::new_v4().to_string();
        let max_attempts = if spec.retryable {
            self.retry.max_attempts()
        } else {
            1
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let (request, session_token) = self.prepare(spec, &url, &request_id);

            let start = Instant::now();
            let outcome = self.transport.send(&request).and_then(|envelope| {
                log::log!(
                    self.log_level(),
                    "[dengsurv] {} {} => {} in {:?} (attempt {}/{}, id {})",
                    spec.method,
                    spec.path,
                    envelope.status,
                    start.elapsed(),
                    attempt,
                    max_attempts,
                    request_id
                );
                error_for_status(envelope, &spec.path)
            });

            let err = match outcome {
                Ok(envelope) => return Ok(envelope),
                Err(err) => err,
            };

            if err.is_authentication() {
                if let Some(sent) = session_token {
                    self.auth.invalidate_if_current(&sent);
                }
            }

            if !(spec.retryable && err.is_transient()) {
                return Err(err);
            }
            if attempt >= max_attempts {
                log::warn!(
                    "[dengsurv] {} {} failed after {} attempts: {}",
                    spec.method,
                    spec.path,
                    attempt,
                    err
                );
                return Err(SurveillanceError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.retry.delay_for(attempt - 1);
            log::warn!(
                "[dengsurv] {} {} attempt {}/{} failed ({}), retrying in {:?}",
                spec.method,
                spec.path,
                attempt,
                max_attempts,
                err,
                delay
            );
            std::thread::sleep(delay);
        }
    }

    /// Execute a request and normalize its body as the request declares
    pub fn request(&self, spec: RequestSpec) -> Result<Payload> {
        let envelope = self.execute(&spec)?;
        normalize(&envelope, spec.expected, &spec.path)
    }

    /// GET an endpoint that answers with a JSON object
    pub fn get_object(&self, path: &str, query: &[(&str, String)]) -> Result<Map<String, Value>> {
        let spec = query.iter().fold(
            RequestSpec::get(path, ExpectedKind::JsonObject),
            |spec, (k, v)| spec.query(k, v),
        );
        self.request(spec)?.into_object()
    }

    /// Resolve headers for one attempt. The session token is read here, at
    /// send time, so a token refreshed between attempts is picked up.
    fn prepare(&self, spec: &RequestSpec, url: &Url, request_id: &str) -> (HttpRequest, Option<String>) {
        let accept = match spec.expected {
            ExpectedKind::Raw => "*/*",
            _ => "application/json",
        };
        let mut headers = vec![
            ("Accept".to_string(), accept.to_string()),
            ("X-Request-Id".to_string(), request_id.to_string()),
        ];

        let session_token = self.auth.bearer();
        let authorization = match (&session_token, &self.config.api_key) {
            (Some(token), _) => Some(token.header_value()),
            (None, Some(key)) => Some(format!("Bearer {}", key)),
            (None, None) => None,
        };
        if let Some(value) = authorization {
            headers.push(("Authorization".to_string(), value));
        }

        let request = HttpRequest {
            method: spec.method.clone(),
            url: url.clone(),
            headers,
            body: spec.body.clone(),
            timeout: self.config.timeout,
        };
        (request, session_token.map(|t| t.access_token))
    }

    fn log_level(&self) -> log::Level {
        if self.config.debug {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("auth_state", &self.auth.state())
            .finish()
    }
}
