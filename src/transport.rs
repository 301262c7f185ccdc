use crate::client::{create_http_client, ClientConfig};
use crate::error::{Result, SurveillanceError};
use crate::request::{HttpRequest, RequestBody};
use crate::response::ResponseEnvelope;
use reqwest::blocking::Client;

/// Sends one HTTP request and returns whatever the server answered.
///
/// Implementations report network-level failures as
/// [`SurveillanceError::Connection`] or [`SurveillanceError::Timeout`]; HTTP
/// error statuses are returned as envelopes, not errors.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<ResponseEnvelope>;
}

/// Transport backed by a blocking reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Wrap an existing reqwest client
    pub fn new(client: Client) -> Self {
        HttpTransport { client }
    }

    /// Build a client from timeouts in `config`
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(HttpTransport::new(create_http_client(config)?))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &HttpRequest) -> Result<ResponseEnvelope> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            None => builder,
        };

        let response = builder.send().map_err(|e| classify(e, request))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(|e| classify(e, request))?;

        Ok(ResponseEnvelope {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn classify(error: reqwest::Error, request: &HttpRequest) -> SurveillanceError {
    let url = request.url.to_string();
    if error.is_timeout() {
        SurveillanceError::Timeout {
            url,
            timeout: request.timeout,
        }
    } else {
        SurveillanceError::Connection {
            message: error.to_string(),
            url,
        }
    }
}
