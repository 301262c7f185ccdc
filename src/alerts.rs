//! Alert logs, thresholds and server-side alert checks.

use crate::data::{area, check_range, format_date, ALL_AREAS};
use crate::error::{Result, SurveillanceError};
use crate::export::ExportFormat;
use crate::models::{AlertLog, AlertStatus, AlertThresholds, Severity, ThresholdConfig};
use crate::request::RequestSpec;
use crate::response::ExpectedKind;
use crate::rest::ApiClient;
use crate::table::{ColumnDecl, ColumnType, Table};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Alerts returned when no limit is given
pub const DEFAULT_ALERT_LIMIT: u32 = 10;

pub const ALERT_SCHEMA: &[ColumnDecl] = &[
    ("id", ColumnType::Integer),
    ("id_seuil", ColumnType::Integer),
    ("usermail", ColumnType::Text),
    ("severity", ColumnType::Category),
    ("status", ColumnType::Category),
    ("message", ColumnType::Text),
    ("region", ColumnType::Category),
    ("district", ColumnType::Category),
    ("notification_type", ColumnType::Category),
    ("recipient", ColumnType::Text),
    ("created_at", ColumnType::DateTime),
];

/// Filters for alert listings and exports
#[derive(Debug, Clone, PartialEq)]
pub struct AlertQuery {
    pub limit: u32,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
    /// Only used by exports
    pub usermail: Option<String>,
}

impl Default for AlertQuery {
    fn default() -> Self {
        AlertQuery {
            limit: DEFAULT_ALERT_LIMIT,
            severity: None,
            status: None,
            region: None,
            district: None,
            date_debut: None,
            date_fin: None,
            usermail: None,
        }
    }
}

impl AlertQuery {
    /// Query with the default limit and no filters
    pub fn new() -> Self {
        AlertQuery::default()
    }

    /// Set the maximum number of alerts returned
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Only alerts of this severity
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Only alerts in this status
    pub fn status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to one region
    pub fn region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    /// Restrict to one district
    pub fn district(mut self, district: &str) -> Self {
        self.district = Some(district.to_string());
        self
    }

    /// Restrict to alerts raised between `start` and `end`
    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_debut = Some(start);
        self.date_fin = Some(end);
        self
    }

    /// Mail of the user whose alerts are exported
    pub fn usermail(mut self, usermail: &str) -> Self {
        self.usermail = Some(usermail.to_string());
        self
    }

    fn apply(&self, spec: RequestSpec) -> Result<RequestSpec> {
        if self.limit == 0 {
            return Err(SurveillanceError::validation("limit must be positive", Some("limit")));
        }
        check_range(self.date_debut, self.date_fin)?;
        Ok(spec
            .query("limit", self.limit)
            .query_opt("severity", self.severity.map(|s| s.as_str()))
            .query_opt("status", self.status.map(|s| s.as_str()))
            .query_opt("region", area(self.region.as_deref()))
            .query_opt("district", area(self.district.as_deref()))
            .query_opt("date_debut", self.date_debut.map(format_date))
            .query_opt("date_fin", self.date_fin.map(format_date)))
    }
}

/// Alert operations of a client
#[derive(Debug, Clone, Copy)]
pub struct AlertManager<'a> {
    client: &'a ApiClient,
}

impl<'a> AlertManager<'a> {
    /// Alert operations borrowing `client`
    pub fn new(client: &'a ApiClient) -> Self {
        AlertManager { client }
    }

    /// Alert logs matching `query`, one row per alert
    pub fn logs(&self, query: &AlertQuery) -> Result<Table> {
        let spec = query.apply(RequestSpec::get(
            "/api/alerts/logs",
            ExpectedKind::table_with_schema(ALERT_SCHEMA),
        ))?;
        self.client.request(spec)?.into_table()
    }

    /// Alert logs as typed entries. Entries the server sends malformed are skipped.
    pub fn entries(&self, query: &AlertQuery) -> Result<Vec<AlertLog>> {
        let spec = query.apply(RequestSpec::get("/api/alerts/logs", ExpectedKind::list()))?;
        let items = self.client.request(spec)?.into_list()?;
        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<AlertLog>(item) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    log::warn!("skipping malformed alert: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Active alerts of critical severity
    pub fn critical(&self, limit: u32) -> Result<Table> {
        self.logs(
            &AlertQuery::new()
                .limit(limit)
                .severity(Severity::Critical)
                .status(AlertStatus::Active),
        )
    }

    /// Active alerts of any severity
    pub fn active(&self, limit: u32) -> Result<Table> {
        self.logs(&AlertQuery::new().limit(limit).status(AlertStatus::Active))
    }

    /// Alerts raised in one region
    pub fn by_region(&self, region: &str, limit: u32) -> Result<Table> {
        self.logs(&AlertQuery::new().limit(limit).region(region))
    }

    /// Alerts raised between `start` and `end`
    pub fn by_period(&self, start: NaiveDate, end: NaiveDate, limit: u32) -> Result<Table> {
        self.logs(&AlertQuery::new().limit(limit).between(start, end))
    }

    /// Store new thresholds for the logged-in user
    pub fn configure_thresholds(&self, config: &ThresholdConfig) -> Result<Map<String, Value>> {
        config.validate()?;
        let spec = RequestSpec::post("/api/alerts/config/seuils", ExpectedKind::JsonObject)
            .json(config)?
            .non_retryable();
        let result = self.client.request(spec)?.into_object()?;
        log::info!("alert thresholds updated");
        Ok(result)
    }

    /// Thresholds configured by the user with mail `usermail`
    pub fn thresholds(&self, usermail: &str) -> Result<AlertThresholds> {
        let usermail = usermail.trim();
        if usermail.is_empty() || usermail.contains(['/', '?', '#']) {
            return Err(SurveillanceError::validation(
                format!("invalid usermail {:?}", usermail),
                Some("usermail"),
            ));
        }
        let spec = RequestSpec::get(format!("/api/alerts/seuils/{}", usermail), ExpectedKind::JsonObject);
        self.client.request(spec)?.apply()
    }

    /// Ask the server to check thresholds against the data of a period.
    ///
    /// The answer is returned as the server sent it.
    pub fn verify(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        region: Option<&str>,
        district: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let spec = area_period(
            RequestSpec::post("/api/alerts/verifier", ExpectedKind::JsonObject),
            start,
            end,
            region,
            district,
        )?;
        self.client.request(spec)?.into_object()
    }

    /// Start the server's scheduled check now
    pub fn trigger_automatic_check(&self) -> Result<Map<String, Value>> {
        let spec = RequestSpec::post("/api/alerts/verification-automatique", ExpectedKind::JsonObject)
            .non_retryable();
        let result = self.client.request(spec)?.into_object()?;
        log::info!("automatic alert check started");
        Ok(result)
    }

    /// Indicator values the alert rules are evaluated against
    pub fn current_indicators(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        region: Option<&str>,
        district: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let spec = area_period(
            RequestSpec::get("/api/alerts/indicateurs", ExpectedKind::JsonObject),
            start,
            end,
            region,
            district,
        )?;
        self.client.request(spec)?.into_object()
    }

    /// Mark an alert as resolved
    pub fn resolve(&self, alert_id: i64) -> Result<()> {
        let spec = RequestSpec::put(format!("/api/alerts/{}/resolve", alert_id), ExpectedKind::JsonObject)
            .non_retryable();
        self.client.request(spec)?;
        log::info!("alert {} resolved", alert_id);
        Ok(())
    }

    /// Alert logs rendered by the server as a file
    pub fn export(&self, format: ExportFormat, query: &AlertQuery) -> Result<Vec<u8>> {
        let spec = query
            .apply(RequestSpec::get("/api/alerts/logs/export", ExpectedKind::Raw))?
            .query("format", format.as_str())
            .query_opt("usermail", query.usermail.as_deref());
        self.client.request(spec)?.into_bytes()
    }
}

/// Region and district always sent, defaulting to every area
fn area_period(
    spec: RequestSpec,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    region: Option<&str>,
    district: Option<&str>,
) -> Result<RequestSpec> {
    check_range(start, end)?;
    Ok(spec
        .query("region", area(region).unwrap_or(ALL_AREAS))
        .query("district", area(district).unwrap_or(ALL_AREAS))
        .query_opt("date_debut", start.map(format_date))
        .query_opt("date_fin", end.map(format_date)))
}
