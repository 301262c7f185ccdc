//! # dengsurv - client for the dengue surveillance API
//!
//! A blocking Rust client for an epidemiological surveillance web service.
//! Every call issues one logical HTTP request, retries transient failures
//! with exponential backoff, and reshapes the JSON answer into typed values
//! or a uniform in-memory [`Table`].
//!
//! ## Features
//!
//! - Configuration from code or from `APPI_*` environment variables
//! - Login with email and password, or a ready bearer token / API key
//! - Typed errors separating connection problems, timeouts, rate limiting,
//!   rejected credentials and server failures
//! - Case data, time series and indicator retrieval as tables
//! - Alert logs, threshold configuration and server-side alert checks
//! - CSV, JSON, XLSX and PDF exports
//! - Anomaly detection, trend, seasonality and short-term forecast helpers
//! - Descriptive summaries of case data and JSON epidemiological reports
//!
//! ## Basic Usage
//!
//! ```no_run
//! use dengsurv::{ApiClient, CaseQuery, ClientConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new(ClientConfig::default())?;
//!     client.authenticate("agent@example.org", "password")?;
//!
//!     let cases = client.data().cases(&CaseQuery::new().region("Centre").limit(100))?;
//!     println!("{} cases, columns: {:?}", cases.len(), cases.column_names().collect::<Vec<_>>());
//!
//!     client.logout()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration from the environment
//!
//! ```no_run
//! use dengsurv::ApiClient;
//!
//! // APPI_API_URL, APPI_API_KEY, APPI_DEBUG, APPI_TIMEOUT,
//! // APPI_RETRY_ATTEMPTS and APPI_RETRY_DELAY are read when set
//! let client = ApiClient::from_env()?;
//! let stats = client.data().stats()?;
//! println!("{} cases this year", stats.total_cases);
//! # Ok::<(), dengsurv::SurveillanceError>(())
//! ```
//!
//! ## Analysis
//!
//! ```no_run
//! use dengsurv::analytics::{detect_anomalies, trend_analysis, AnomalyMethod};
//! use dengsurv::{ApiClient, ClientConfig, PeriodQuery};
//!
//! let client = ApiClient::new(ClientConfig::default().with_api_key("key"))?;
//! let series = client.analyzer().time_series(&PeriodQuery::new())?;
//! let flagged = detect_anomalies(&series, AnomalyMethod::Iqr)?;
//! if let Some(trend) = trend_analysis(&flagged, "total_cas")? {
//!     println!("{:?} ({:.1}% per week)", trend.direction, trend.slope_percentage);
//! }
//! # Ok::<(), dengsurv::SurveillanceError>(())
//! ```

pub mod account;
pub mod alerts;
pub mod analytics;
pub mod auth;
pub mod client;
pub mod data;
pub mod error;
pub mod export;
pub mod models;
pub mod report;
pub mod request;
pub mod response;
pub mod rest;
pub mod retry;
pub mod summary;
pub mod table;
pub mod time;
pub mod token;
pub mod transport;

// Re-export main types for convenience
pub use account::AccountApi;
pub use alerts::{AlertManager, AlertQuery};
pub use analytics::EpidemiologicalAnalyzer;
pub use auth::AuthState;
pub use client::ClientConfig;
pub use data::{CaseQuery, DataApi, PeriodQuery};
pub use error::{Result, SurveillanceError};
pub use export::{DataExporter, ExportFormat};
pub use report::Report;
pub use request::RequestSpec;
pub use response::{ExpectedKind, Payload, ResponseEnvelope};
pub use rest::ApiClient;
pub use summary::Summary;
pub use table::{Cell, ColumnType, Table};
pub use time::Timestamp;
pub use token::AuthToken;
pub use transport::{HttpTransport, Transport};

// Re-export serde_json for convenience
pub use serde_json::json;
