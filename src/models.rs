//! Wire models of the surveillance API.
//!
//! Field names follow the server's JSON (French, partly camelCase) through
//! serde renames; the Rust side uses English names.

use crate::error::{Result, SurveillanceError};
use crate::time::Timestamp;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Regions accepted for case submission
pub const SUBMISSION_REGIONS: &[&str] = &["centre", "hauts-bassins"];

/// Patient sex, as spelled by the data sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Masculin,
    Feminin,
    M,
    F,
    Homme,
    Femme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestResult {
    #[serde(rename = "positif")]
    Positive,
    #[serde(rename = "négatif")]
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serotype {
    Denv2,
    Denv3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hospitalization {
    #[serde(rename = "oui")]
    Yes,
    #[serde(rename = "non")]
    No,
}

/// Case outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Outcome {
    #[default]
    #[serde(rename = "guéri")]
    Recovered,
    #[serde(rename = "en traitement")]
    InTreatment,
    #[serde(rename = "décédé")]
    Deceased,
    #[serde(rename = "inconnue")]
    Unknown,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Wire spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SurveillanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(SurveillanceError::validation(
                format!("unknown severity {:?}, expected info, warning or critical", s),
                Some("severity"),
            )),
        }
    }
}

/// Alert lifecycle status.
///
/// The server writes it either as a word or as `1`/`0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    /// Wire spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AlertStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AlertStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match &raw {
            Value::String(s) if s.eq_ignore_ascii_case("active") || s == "1" => Ok(AlertStatus::Active),
            Value::String(s) if s.eq_ignore_ascii_case("resolved") || s == "0" => {
                Ok(AlertStatus::Resolved)
            }
            Value::Number(n) if n.as_i64() == Some(1) => Ok(AlertStatus::Active),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(AlertStatus::Resolved),
            Value::Bool(active) => Ok(if *active {
                AlertStatus::Active
            } else {
                AlertStatus::Resolved
            }),
            other => Err(serde::de::Error::custom(format!("invalid alert status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Analyst,
    Admin,
    Authority,
}

/// Aggregation step of a time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    #[default]
    Weekly,
    Monthly,
}

impl Frequency {
    /// Code sent as the `frequence` query parameter
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Weekly => "W",
            Frequency::Monthly => "M",
        }
    }
}

/// Account profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

fn default_true() -> bool {
    true
}

/// Headline figures for the current year
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_cases: u64,
    pub total_positives: u64,
    pub total_hospitalized: u64,
    pub total_deaths: u64,
    pub active_regions: Vec<String>,
    pub active_districts: Vec<String>,
    /// When these figures were fetched; the server does not report it
    pub fetched_at: Timestamp,
}

impl Statistics {
    /// Read the `annee_en_cours` section of a `/api/stats` body.
    ///
    /// Absent counters read as zero. Only the top region and district are
    /// reported by the server, so the active lists hold at most one entry.
    pub fn from_stats_body(body: &Map<String, Value>) -> Self {
        let year = body.get("annee_en_cours").and_then(Value::as_object);
        let count = |key: &str| {
            year.and_then(|y| y.get(key))
                .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
                .unwrap_or(0)
        };
        let top = |key: &str| -> Vec<String> {
            year.and_then(|y| y.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| vec![s.to_string()])
                .unwrap_or_default()
        };

        Statistics {
            total_cases: count("total_cases"),
            total_positives: count("total_positives"),
            total_hospitalized: count("total_hospitalized"),
            total_deaths: count("total_deaths"),
            active_regions: top("top_region"),
            active_districts: top("top_district"),
            fetched_at: Timestamp::now(),
        }
    }
}

/// Alert raised by the server when a threshold is crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLog {
    pub id: i64,
    #[serde(rename = "id_seuil", default)]
    pub threshold_id: Option<i64>,
    #[serde(default)]
    pub usermail: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Stored alert thresholds of one user, in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default)]
    pub id: i64,
    pub usermail: String,
    /// "1" weekly, "2" monthly, "3" yearly
    #[serde(rename = "intervalle", default = "default_interval")]
    pub interval: String,
    #[serde(rename = "seuil_positivite", default = "default_threshold")]
    pub positivity: i32,
    #[serde(rename = "seuil_hospitalisation", default = "default_threshold")]
    pub hospitalization: i32,
    #[serde(rename = "seuil_deces", default = "default_threshold")]
    pub deaths: i32,
    #[serde(rename = "seuil_positivite_region", default = "default_threshold")]
    pub positivity_region: i32,
    #[serde(rename = "seuil_hospitalisation_region", default = "default_threshold")]
    pub hospitalization_region: i32,
    #[serde(rename = "seuil_deces_region", default = "default_threshold")]
    pub deaths_region: i32,
    #[serde(rename = "seuil_positivite_district", default = "default_threshold")]
    pub positivity_district: i32,
    #[serde(rename = "seuil_hospitalisation_district", default = "default_threshold")]
    pub hospitalization_district: i32,
    #[serde(rename = "seuil_deces_district", default = "default_threshold")]
    pub deaths_district: i32,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

fn default_interval() -> String {
    "1".to_string()
}

fn default_threshold() -> i32 {
    10
}

/// Threshold update. Unset fields are left unchanged on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdConfig {
    #[serde(rename = "seuil_positivite", skip_serializing_if = "Option::is_none")]
    pub positivity: Option<i32>,
    #[serde(rename = "seuil_hospitalisation", skip_serializing_if = "Option::is_none")]
    pub hospitalization: Option<i32>,
    #[serde(rename = "seuil_deces", skip_serializing_if = "Option::is_none")]
    pub deaths: Option<i32>,
    #[serde(rename = "seuil_positivite_region", skip_serializing_if = "Option::is_none")]
    pub positivity_region: Option<i32>,
    #[serde(rename = "seuil_hospitalisation_region", skip_serializing_if = "Option::is_none")]
    pub hospitalization_region: Option<i32>,
    #[serde(rename = "seuil_deces_region", skip_serializing_if = "Option::is_none")]
    pub deaths_region: Option<i32>,
    #[serde(rename = "seuil_positivite_district", skip_serializing_if = "Option::is_none")]
    pub positivity_district: Option<i32>,
    #[serde(rename = "seuil_hospitalisation_district", skip_serializing_if = "Option::is_none")]
    pub hospitalization_district: Option<i32>,
    #[serde(rename = "seuil_deces_district", skip_serializing_if = "Option::is_none")]
    pub deaths_district: Option<i32>,
    #[serde(rename = "intervalle", skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl ThresholdConfig {
    /// National thresholds only
    pub fn new(positivity: i32, hospitalization: i32, deaths: i32) -> Self {
        ThresholdConfig {
            positivity: Some(positivity),
            hospitalization: Some(hospitalization),
            deaths: Some(deaths),
            ..Default::default()
        }
    }

    /// Set the check interval ("1", "2" or "3")
    pub fn with_interval(mut self, interval: &str) -> Self {
        self.interval = Some(interval.to_string());
        self
    }

    /// Every threshold must be a percentage and the interval one of "1", "2", "3"
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("seuil_positivite", self.positivity),
            ("seuil_hospitalisation", self.hospitalization),
            ("seuil_deces", self.deaths),
            ("seuil_positivite_region", self.positivity_region),
            ("seuil_hospitalisation_region", self.hospitalization_region),
            ("seuil_deces_region", self.deaths_region),
            ("seuil_positivite_district", self.positivity_district),
            ("seuil_hospitalisation_district", self.hospitalization_district),
            ("seuil_deces_district", self.deaths_district),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if !(0..=100).contains(&v) {
                    return Err(SurveillanceError::validation(
                        format!("{} must be between 0 and 100, got {}", name, v),
                        Some(name),
                    ));
                }
            }
        }
        if let Some(interval) = &self.interval {
            if !matches!(interval.as_str(), "1" | "2" | "3") {
                return Err(SurveillanceError::validation(
                    format!("intervalle must be 1, 2 or 3, got {:?}", interval),
                    Some("intervalle"),
                ));
            }
        }
        Ok(())
    }
}

/// One dengue case, as submitted to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(rename = "idCas")]
    pub case_id: i64,
    #[serde(rename = "sexe")]
    pub sex: Sex,
    pub age: u32,
    #[serde(default = "default_region")]
    pub region: Option<String>,
    #[serde(default)]
    pub date_consultation: Option<NaiveDate>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(rename = "resultat_test", default)]
    pub test_result: Option<TestResult>,
    #[serde(default)]
    pub serotype: Option<Serotype>,
    #[serde(rename = "hospitalisation", default)]
    pub hospitalization: Option<Hospitalization>,
    #[serde(rename = "issue", default = "default_outcome")]
    pub outcome: Option<Outcome>,
    pub id_source: i64,
}

fn default_region() -> Option<String> {
    Some("Centre".to_string())
}

fn default_outcome() -> Option<Outcome> {
    Some(Outcome::Recovered)
}

impl CaseRecord {
    /// Case with the default region and outcome
    pub fn new(case_id: i64, sex: Sex, age: u32, id_source: i64) -> Self {
        CaseRecord {
            case_id,
            sex,
            age,
            region: default_region(),
            date_consultation: None,
            district: None,
            test_result: None,
            serotype: None,
            hospitalization: None,
            outcome: default_outcome(),
            id_source,
        }
    }

    /// Age in 1..=120; region, when given, one of [`SUBMISSION_REGIONS`]
    pub fn validate(&self) -> Result<()> {
        if !(1..=120).contains(&self.age) {
            return Err(SurveillanceError::validation(
                format!("case {}: age must be between 1 and 120, got {}", self.case_id, self.age),
                Some("age"),
            ));
        }
        if let Some(region) = &self.region {
            let known = SUBMISSION_REGIONS
                .iter()
                .any(|r| r.eq_ignore_ascii_case(region.trim()));
            if !known {
                return Err(SurveillanceError::validation(
                    format!(
                        "case {}: invalid region {:?}, expected one of {:?}",
                        self.case_id, region, SUBMISSION_REGIONS
                    ),
                    Some("region"),
                ));
            }
        }
        Ok(())
    }
}

/// Account creation form
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub terms: bool,
    pub newsletter: bool,
}

impl RegisterRequest {
    /// Check the mandatory fields and the email shape
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("email", &self.email),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                return Err(SurveillanceError::validation(
                    format!("{} must not be empty", name),
                    Some(name),
                ));
            }
        }
        if !self.email.contains('@') {
            return Err(SurveillanceError::validation(
                format!("invalid email address {:?}", self.email),
                Some("email"),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("terms", &self.terms)
            .field("newsletter", &self.newsletter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alert_log_from_server() {
        let alert: AlertLog = serde_json::from_value(json!({
            "id": 7,
            "id_seuil": 2,
            "severity": "critical",
            "status": 1,
            "message": "Taux de positivité élevé",
            "region": "Centre",
            "created_at": "2024-06-01 08:00:00"
        }))
        .unwrap();
        assert_eq!(alert.threshold_id, Some(2));
        assert_eq!(alert.severity, Some(Severity::Critical));
        assert_eq!(alert.status, Some(AlertStatus::Active));
        assert!(alert.created_at.is_some());
        assert_eq!(alert.district, None);

        let resolved: AlertLog =
            serde_json::from_value(json!({"id": 8, "status": "resolved"})).unwrap();
        assert_eq!(resolved.status, Some(AlertStatus::Resolved));
    }

    #[test]
    fn test_statistics_from_stats_body() {
        let body = json!({
            "annee_en_cours": {
                "total_cases": 120,
                "total_positives": 45,
                "total_hospitalized": 12,
                "total_deaths": 1,
                "top_region": "Centre",
                "top_district": ""
            }
        });
        let stats = Statistics::from_stats_body(body.as_object().unwrap());
        assert_eq!(stats.total_cases, 120);
        assert_eq!(stats.total_positives, 45);
        assert_eq!(stats.active_regions, vec!["Centre".to_string()]);
        assert!(stats.active_districts.is_empty());

        let empty = Statistics::from_stats_body(&Map::new());
        assert_eq!(empty.total_deaths, 0);
    }

    #[test]
    fn test_threshold_config_validation() {
        assert!(ThresholdConfig::new(10, 20, 5).with_interval("2").validate().is_ok());
        assert!(ThresholdConfig::new(101, 20, 5).validate().is_err());
        assert!(ThresholdConfig::new(10, -1, 5).validate().is_err());
        assert!(ThresholdConfig::new(10, 20, 5).with_interval("7").validate().is_err());

        let body = serde_json::to_value(ThresholdConfig::new(10, 20, 5)).unwrap();
        assert_eq!(
            body,
            json!({"seuil_positivite": 10, "seuil_hospitalisation": 20, "seuil_deces": 5})
        );
    }

    #[test]
    fn test_thresholds_defaults() {
        let t: AlertThresholds =
            serde_json::from_value(json!({"usermail": "a@b.bf", "seuil_deces": 3})).unwrap();
        assert_eq!(t.interval, "1");
        assert_eq!(t.positivity, 10);
        assert_eq!(t.deaths, 3);
    }

    #[test]
    fn test_case_record_validation_and_wire_names() {
        let mut case = CaseRecord::new(1, Sex::F, 34, 2);
        assert!(case.validate().is_ok());

        let body = serde_json::to_value(&case).unwrap();
        assert_eq!(body["idCas"], 1);
        assert_eq!(body["sexe"], "f");
        assert_eq!(body["issue"], "guéri");
        assert_eq!(body["region"], "Centre");

        case.age = 0;
        assert!(case.validate().is_err());
        case.age = 121;
        assert!(case.validate().is_err());
        case.age = 120;
        case.region = Some("Nord".to_string());
        assert!(case.validate().is_err());
        case.region = Some("HAUTS-BASSINS".to_string());
        assert!(case.validate().is_ok());
        case.region = None;
        assert!(case.validate().is_ok());
    }

    #[test]
    fn test_register_request() {
        let req = RegisterRequest {
            first_name: "Awa".to_string(),
            last_name: "Ouédraogo".to_string(),
            email: "awa@example.bf".to_string(),
            username: "awa".to_string(),
            password: "s3cret".to_string(),
            terms: true,
            newsletter: false,
        };
        assert!(req.validate().is_ok());
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["firstName"], "Awa");
        assert_eq!(body["lastName"], "Ouédraogo");
        assert!(!format!("{:?}", req).contains("s3cret"));

        let bad = RegisterRequest {
            email: "not-an-email".to_string(),
            ..req
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_user_defaults() {
        let user: User = serde_json::from_value(json!({
            "id": 3, "username": "analyst", "email": "a@b.bf"
        }))
        .unwrap();
        assert_eq!(user.role, Role::User);
        assert!(user.is_active);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
    }
}
