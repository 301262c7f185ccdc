//! Case data, time series and epidemiological indicators.

use crate::error::{Result, SurveillanceError};
use crate::models::{CaseRecord, Frequency, Statistics};
use crate::request::RequestSpec;
use crate::response::ExpectedKind;
use crate::rest::ApiClient;
use crate::table::{ColumnDecl, ColumnType, Table};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Columns of an individual case record
pub const CASE_SCHEMA: &[ColumnDecl] = &[
    ("idCas", ColumnType::Integer),
    ("date_consultation", ColumnType::Date),
    ("region", ColumnType::Category),
    ("district", ColumnType::Category),
    ("sexe", ColumnType::Category),
    ("age", ColumnType::Integer),
    ("resultat_test", ColumnType::Category),
    ("serotype", ColumnType::Category),
    ("hospitalise", ColumnType::Category),
    ("issue", ColumnType::Category),
    ("id_source", ColumnType::Integer),
];

/// Columns of a weekly aggregate row
pub const WEEKLY_SCHEMA: &[ColumnDecl] = &[
    ("annee", ColumnType::Integer),
    ("semaine", ColumnType::Integer),
    ("region", ColumnType::Category),
    ("district", ColumnType::Category),
];

/// Period bounds of a time series row; the counters are inferred
pub const TIME_SERIES_SCHEMA: &[ColumnDecl] = &[
    ("date_debut", ColumnType::Date),
    ("date_fin", ColumnType::Date),
];

/// Value the server uses for "no filter" on region and district
pub const ALL_AREAS: &str = "Toutes";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn check_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    match (start, end) {
        (Some(s), Some(e)) if s > e => Err(SurveillanceError::validation(
            format!("date_debut {} is after date_fin {}", s, e),
            Some("date_debut"),
        )),
        _ => Ok(()),
    }
}

/// A region/district filter, dropped when empty or set to "all"
pub(crate) fn area(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(ALL_AREAS))
}

/// Filters for `/api/data`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseQuery {
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

impl CaseQuery {
    /// Query with no filters
    pub fn new() -> Self {
        CaseQuery::default()
    }

    /// Restrict to consultations between `start` and `end`
    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_debut = Some(start);
        self.date_fin = Some(end);
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

    /// Set the page size
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the page, starting at 1
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Check paging and date range
    pub fn validate(&self) -> Result<()> {
        check_range(self.date_debut, self.date_fin)?;
        if self.limit == Some(0) {
            return Err(SurveillanceError::validation("limit must be positive", Some("limit")));
        }
        if self.page == Some(0) {
            return Err(SurveillanceError::validation("pages start at 1", Some("page")));
        }
        Ok(())
    }

    pub(crate) fn apply(&self, spec: RequestSpec) -> RequestSpec {
        spec.query_opt("date_debut", self.date_debut.map(format_date))
            .query_opt("date_fin", self.date_fin.map(format_date))
            .query_opt("region", area(self.region.as_deref()))
            .query_opt("district", area(self.district.as_deref()))
            .query_opt("limit", self.limit)
            .query_opt("page", self.page)
    }
}

/// Filters for `/api/time-series`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodQuery {
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub frequency: Frequency,
}

impl PeriodQuery {
    /// Query over the whole history, weekly
    pub fn new() -> Self {
        PeriodQuery::default()
    }

    /// Restrict to periods between `start` and `end`
    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_debut = Some(start);
        self.date_fin = Some(end);
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

    /// Set the aggregation period
    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    fn to_spec(&self) -> Result<RequestSpec> {
        check_range(self.date_debut, self.date_fin)?;
        Ok(
            RequestSpec::get("/api/time-series", ExpectedKind::table_with_schema(TIME_SERIES_SCHEMA))
                .query_opt("date_debut", self.date_debut.map(format_date))
                .query_opt("date_fin", self.date_fin.map(format_date))
                .query_opt("region", area(self.region.as_deref()))
                .query_opt("district", area(self.district.as_deref()))
                .query("frequence", self.frequency.code()),
        )
    }
}

/// Read access to surveillance data
#[derive(Debug, Clone, Copy)]
pub struct DataApi<'a> {
    client: &'a ApiClient,
}

impl<'a> DataApi<'a> {
    /// Data operations borrowing `client`
    pub fn new(client: &'a ApiClient) -> Self {
        DataApi { client }
    }

    /// Weekly aggregates for one month
    pub fn weekly_cases(
        &self,
        year: i32,
        month: u32,
        region: Option<&str>,
        district: Option<&str>,
    ) -> Result<Table> {
        if !(1000..=9999).contains(&year) {
            return Err(SurveillanceError::validation(
                format!("year must have four digits, got {}", year),
                Some("annee"),
            ));
        }
        if !(1..=12).contains(&month) {
            return Err(SurveillanceError::validation(
                format!("month must be between 1 and 12, got {}", month),
                Some("mois"),
            ));
        }
        let spec = RequestSpec::get("/api/data/hebdomadaires", ExpectedKind::table_with_schema(WEEKLY_SCHEMA))
            .query("annee", year)
            .query("mois", month)
            .query_opt("region", area(region))
            .query_opt("district", area(district));
        self.client.request(spec)?.into_table()
    }

    /// Individual case records
    pub fn cases(&self, query: &CaseQuery) -> Result<Table> {
        query.validate()?;
        let spec = query.apply(RequestSpec::get(
            "/api/data",
            ExpectedKind::table_with_schema(CASE_SCHEMA),
        ));
        self.client.request(spec)?.into_table()
    }

    /// Indicators per period, in server order
    pub fn time_series(&self, query: &PeriodQuery) -> Result<Table> {
        self.client.request(query.to_spec()?)?.into_table()
    }

    /// Headline figures for the current year
    pub fn stats(&self) -> Result<Statistics> {
        let body = self.client.get_object("/api/stats", &[])?;
        Ok(Statistics::from_stats_body(&body))
    }

    /// Names of the regions known to the server
    pub fn regions(&self) -> Result<Vec<String>> {
        self.names("/api/regions", "regions", None)
    }

    /// Districts, optionally restricted to one region
    pub fn districts(&self, region: Option<&str>) -> Result<Vec<String>> {
        self.names("/api/districts", "districts", area(region))
    }

    fn names(&self, path: &str, key: &'static str, region: Option<&str>) -> Result<Vec<String>> {
        let spec = RequestSpec::get(path, ExpectedKind::JsonList { key }).query_opt("region", region);
        let items = self.client.request(spec)?.into_list()?;
        let total = items.len();
        let names: Vec<String> = items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect();
        if names.len() < total {
            log::warn!("{}: skipped {} non-string entries", path, total - names.len());
        }
        Ok(names)
    }

    /// Share of cases hospitalized over a period
    pub fn hospitalization_rate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        region: Option<&str>,
        district: Option<&str>,
    ) -> Result<Map<String, Value>> {
        self.rate("/indicateurs/taux-hospitalisation", start, end, &[
            ("region", area(region)),
            ("district", area(district)),
        ])
    }

    /// Lethality per `level` ("region" by default) for one serotype ("Tous" by default)
    pub fn lethality_rate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        level: Option<&str>,
        serotype: Option<&str>,
    ) -> Result<Map<String, Value>> {
        self.rate("/indicateurs/taux-deletalite", start, end, &[
            ("niveau", Some(level.unwrap_or("region"))),
            ("serotype", Some(serotype.unwrap_or("Tous"))),
        ])
    }

    /// Share of positive tests over a period
    pub fn positivity_rate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        region: Option<&str>,
        district: Option<&str>,
    ) -> Result<Map<String, Value>> {
        self.rate("/indicateurs/taux-positivite", start, end, &[
            ("region", area(region)),
            ("district", area(district)),
        ])
    }

    fn rate(
        &self,
        path: &str,
        start: NaiveDate,
        end: NaiveDate,
        extra: &[(&str, Option<&str>)],
    ) -> Result<Map<String, Value>> {
        check_range(Some(start), Some(end))?;
        let spec = extra.iter().fold(
            RequestSpec::get(path, ExpectedKind::JsonObject)
                .query("date_debut", format_date(start))
                .query("date_fin", format_date(end)),
            |spec, (key, value)| spec.query_opt(key, *value),
        );
        self.client.request(spec)?.into_object()
    }

    /// When the server data was last refreshed
    pub fn last_update(&self) -> Result<Map<String, Value>> {
        self.client.get_object("/api/derniere-mise-a-jour", &[])
    }

    /// Submit new cases. Every record is checked before anything is sent.
    pub fn submit_cases(&self, cases: &[CaseRecord]) -> Result<Map<String, Value>> {
        if cases.is_empty() {
            return Err(SurveillanceError::validation("no cases to submit", Some("cases")));
        }
        for case in cases {
            case.validate()?;
        }
        let spec = RequestSpec::post("/add-listCasDengue-json/", ExpectedKind::JsonObject)
            .json(&cases)?
            .non_retryable();
        let result = self.client.request(spec)?.into_object()?;
        log::info!("submitted {} case(s)", cases.len());
        Ok(result)
    }
}
