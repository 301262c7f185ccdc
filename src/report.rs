//! Epidemiological report: one time series run through every analysis,
//! kept as a serializable value and saved as JSON.

use crate::analytics::{
    detect_anomalies, epidemic_rates, forecast_next_week, seasonal_analysis, trend_analysis,
    AnomalyMethod, EpidemicRates, Forecast, SeasonalAnalysis, TrendAnalysis,
};
use crate::data::PeriodQuery;
use crate::error::Result;
use crate::table::{Cell, Table};
use crate::time::Timestamp;
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Indicator the trend, seasonality, forecast and anomaly sections follow
pub const REPORT_INDICATOR: &str = "total_cas";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub generated_at: Timestamp,
    pub data_points: usize,
}

/// A period whose case count was flagged as anomalous
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyPeriod {
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
    pub total_cas: Option<f64>,
}

/// Sections that need more data than the period holds are `None`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub rates: Option<EpidemicRates>,
    pub trend: Option<TrendAnalysis>,
    pub seasonality: Option<SeasonalAnalysis>,
    pub forecast: Option<Forecast>,
    pub anomalies: Vec<AnomalyPeriod>,
    pub data: Table,
}

impl Report {
    /// Analyse a time series fetched with `query`
    pub fn build(query: &PeriodQuery, data: Table) -> Result<Self> {
        let flagged = detect_anomalies(&data, AnomalyMethod::ZScore)?;
        let flag_column = format!("{}_anomaly", REPORT_INDICATOR);
        let anomalies = flagged
            .records()
            .filter(|r| r.get(&flag_column).and_then(Cell::as_bool) == Some(true))
            .map(|r| AnomalyPeriod {
                date_debut: r.get("date_debut").and_then(Cell::as_date),
                date_fin: r.get("date_fin").and_then(Cell::as_date),
                total_cas: r.get(REPORT_INDICATOR).and_then(Cell::as_f64),
            })
            .collect();

        Ok(Report {
            metadata: ReportMetadata {
                date_debut: query.date_debut,
                date_fin: query.date_fin,
                region: query.region.clone(),
                district: query.district.clone(),
                generated_at: Timestamp::now(),
                data_points: data.len(),
            },
            rates: epidemic_rates(&data)?,
            trend: trend_analysis(&data, REPORT_INDICATOR)?,
            seasonality: seasonal_analysis(&data, REPORT_INDICATOR)?,
            forecast: forecast_next_week(&data, REPORT_INDICATOR)?,
            anomalies,
            data,
        })
    }

    /// Write the report as indented JSON, replacing any existing file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        log::info!("report saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn weekly(counts: &[i64]) -> Table {
        let records: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::weeks(i as i64);
                json!({
                    "date_debut": start.to_string(),
                    "date_fin": (start + chrono::Duration::days(6)).to_string(),
                    "total_cas": c,
                    "cas_positifs": c / 2,
                    "hospitalisations": c / 10,
                    "deces": 0
                })
            })
            .collect();
        Table::from_records(&records, crate::data::TIME_SERIES_SCHEMA)
    }

    #[test]
    fn test_build_report() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let query = PeriodQuery::new().between(start, end).region("Centre");
        let report = Report::build(&query, weekly(&[10, 12, 11, 9, 10, 120, 11, 10, 12, 9])).unwrap();

        assert_eq!(report.metadata.data_points, 10);
        assert_eq!(report.metadata.region.as_deref(), Some("Centre"));
        assert_eq!(report.metadata.date_debut, Some(start));
        assert_eq!(report.rates.as_ref().unwrap().total_cases, 214.0);
        assert!(report.trend.is_some());
        assert_eq!(report.seasonality.as_ref().unwrap().peak_month, 2);
        assert_eq!(report.forecast.as_ref().unwrap().values_used, 4);

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].total_cas, Some(120.0));
        assert_eq!(report.anomalies[0].date_debut, NaiveDate::from_ymd_opt(2024, 2, 5));
    }

    #[test]
    fn test_build_report_without_data() {
        let report = Report::build(&PeriodQuery::new(), Table::default()).unwrap();
        assert_eq!(report.metadata.data_points, 0);
        assert!(report.rates.is_none());
        assert!(report.trend.is_none());
        assert!(report.forecast.is_none());
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_save_report() {
        let report = Report::build(&PeriodQuery::new(), weekly(&[5, 6, 7])).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save(&path).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["metadata"]["data_points"], 3);
        assert_eq!(saved["data"][2]["total_cas"], 7);
        assert_eq!(saved["data"][0]["date_debut"], "2024-01-01");
        assert_eq!(saved["trend"]["direction"], "increasing");
        assert!(saved["anomalies"].as_array().unwrap().is_empty());
    }
}
