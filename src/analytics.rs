//! Descriptive and temporal analysis of surveillance tables.
//!
//! The free functions work on any [`Table`] holding the usual indicator
//! columns (`date_debut`, `total_cas`, `cas_positifs`, `hospitalisations`,
//! `deces`). Too little data gives `Ok(None)`; a column that exists but is
//! not numeric is an [`SurveillanceError::Analysis`] error.

use crate::data::{CaseQuery, PeriodQuery};
use crate::error::{Result, SurveillanceError};
use crate::report::Report;
use crate::rest::ApiClient;
use crate::summary::{last_update_from_body, summarize, Summary};
use crate::table::{Cell, ColumnType, Table};
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Counter columns checked for anomalies
pub const ANOMALY_COLUMNS: &[&str] = &["total_cas", "cas_positifs", "hospitalisations", "deces"];

/// Absolute z-score above which a value is anomalous
pub const ZSCORE_THRESHOLD: f64 = 2.0;

/// Number of trailing points averaged by [`forecast_next_week`]
pub const FORECAST_WINDOW: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnomalyMethod {
    /// Distance from the mean in sample standard deviations
    #[default]
    ZScore,
    /// Outside 1.5 interquartile ranges of the quartiles
    Iqr,
}

impl FromStr for AnomalyMethod {
    type Err = SurveillanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zscore" | "z-score" => Ok(AnomalyMethod::ZScore),
            "iqr" => Ok(AnomalyMethod::Iqr),
            other => Err(SurveillanceError::Analysis(format!(
                "unsupported anomaly detection method {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Least-squares line through a column, indexed by row position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation with the row index; `None` for a constant column
    pub correlation: Option<f64>,
    pub direction: TrendDirection,
    /// Slope relative to the mean, in percent
    pub slope_percentage: f64,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalAnalysis {
    pub peak_month: u32,
    pub trough_month: u32,
    pub amplitude: f64,
    pub monthly_means: BTreeMap<u32, f64>,
    /// Monthly mean over overall mean, in percent. Empty when the overall mean is not positive.
    pub seasonal_index: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub prediction: f64,
    pub lower: f64,
    pub upper: f64,
    pub method: &'static str,
    pub values_used: usize,
}

/// Totals and rates over a period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpidemicRates {
    pub total_cases: f64,
    pub total_positives: f64,
    pub total_hospitalized: f64,
    pub total_deaths: f64,
    /// Percentages of `total_cases`, zero when there are no cases
    pub positivity_rate: f64,
    pub hospitalization_rate: f64,
    pub lethality_rate: f64,
}

/// Analyses that fetch their own data
#[derive(Debug, Clone, Copy)]
pub struct EpidemiologicalAnalyzer<'a> {
    client: &'a ApiClient,
}

impl<'a> EpidemiologicalAnalyzer<'a> {
    /// Analyzer borrowing `client`
    pub fn new(client: &'a ApiClient) -> Self {
        EpidemiologicalAnalyzer { client }
    }

    /// Time series for the period, oldest first
    pub fn time_series(&self, query: &PeriodQuery) -> Result<Table> {
        let mut table = self.client.data().time_series(query)?;
        if table.has_column("date_debut") {
            table.sort_by_column("date_debut")?;
        }
        log::info!("time series with {} points", table.len());
        Ok(table)
    }

    /// Rates over the whole period; `None` when the server has no data for it
    pub fn calculate_rates(&self, query: &PeriodQuery) -> Result<Option<EpidemicRates>> {
        let table = self.time_series(query)?;
        epidemic_rates(&table)
    }

    /// Descriptive summary of the case records matching `query`, with the
    /// server's last refresh time when there is data
    pub fn resume(&self, query: &CaseQuery) -> Result<Summary> {
        let cases = self.client.data().cases(query)?;
        let mut summary = summarize(&cases);
        if !cases.is_empty() {
            summary.last_update = last_update_from_body(&self.client.data().last_update()?);
        }
        log::info!("summarized {} case records", summary.records);
        Ok(summary)
    }

    /// Rates, trend, seasonality, forecast and anomalies of the period's time series
    pub fn generate_report(&self, query: &PeriodQuery) -> Result<Report> {
        let report = Report::build(query, self.time_series(query)?)?;
        log::info!(
            "report generated over {} periods, {} anomalous",
            report.metadata.data_points,
            report.anomalies.len()
        );
        Ok(report)
    }
}

/// Present numeric values of a column, or `None` when the column is absent
fn numeric_values(table: &Table, column: &str) -> Result<Option<Vec<f64>>> {
    let cells = match table.column(column) {
        Some(cells) => cells,
        None => return Ok(None),
    };
    let kind = table.column_type(column);
    let non_numeric = cells.iter().any(|c| !c.is_missing() && c.as_f64().is_none());
    if non_numeric {
        return Err(SurveillanceError::Analysis(format!(
            "column {:?} is not numeric ({:?})",
            column, kind
        )));
    }
    Ok(Some(cells.into_iter().filter_map(Cell::as_f64).collect()))
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` degrees of freedom removed
pub(crate) fn std_dev(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - ddof) as f64).sqrt()
}

/// Quantile with linear interpolation between closest ranks; `sorted` must be non-empty
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Copy of `table` with a boolean `<column>_anomaly` column for each counter column present
pub fn detect_anomalies(table: &Table, method: AnomalyMethod) -> Result<Table> {
    let mut out = table.clone();
    if table.is_empty() {
        return Ok(out);
    }

    for &column in ANOMALY_COLUMNS {
        let cells = match table.numeric_column(column) {
            Some(cells) => cells,
            None => continue,
        };
        if numeric_values(table, column)?.is_none() {
            continue;
        }
        let present: Vec<f64> = cells.iter().flatten().copied().collect();

        let is_anomaly: Box<dyn Fn(f64) -> bool> = match method {
            AnomalyMethod::ZScore => {
                let m = mean(&present);
                let sd = std_dev(&present, 1);
                if sd.is_finite() && sd > 0.0 {
                    Box::new(move |v| ((v - m) / sd).abs() > ZSCORE_THRESHOLD)
                } else {
                    Box::new(|_| false)
                }
            }
            AnomalyMethod::Iqr => {
                if present.is_empty() {
                    Box::new(|_| false)
                } else {
                    let mut sorted = present.clone();
                    sorted.sort_by(|a, b| a.total_cmp(b));
                    let q1 = quantile(&sorted, 0.25);
                    let q3 = quantile(&sorted, 0.75);
                    let iqr = q3 - q1;
                    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
                    Box::new(move |v| v < lower || v > upper)
                }
            }
        };

        let flags: Vec<Cell> = cells
            .iter()
            .map(|v| Cell::Boolean(v.map_or(false, |x| is_anomaly(x))))
            .collect();
        let flagged = flags.iter().filter(|c| c.as_bool() == Some(true)).count();
        log::debug!("{}: {} anomalous value(s) with {:?}", column, flagged, method);
        out.push_column(&format!("{}_anomaly", column), ColumnType::Boolean, flags)?;
    }
    Ok(out)
}

/// Linear trend of `column` over row order
pub fn trend_analysis(table: &Table, column: &str) -> Result<Option<TrendAnalysis>> {
    let values = match numeric_values(table, column)? {
        Some(v) if v.len() >= 2 => v,
        _ => return Ok(None),
    };

    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(&values);
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let correlation = if syy > 0.0 {
        Some(sxy / (sxx * syy).sqrt())
    } else {
        None
    };

    let direction = if slope > 0.0 {
        TrendDirection::Increasing
    } else if slope < 0.0 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    Ok(Some(TrendAnalysis {
        slope,
        intercept,
        correlation,
        direction,
        slope_percentage: if y_mean > 0.0 { slope / y_mean * 100.0 } else { 0.0 },
        mean: y_mean,
        std: std_dev(&values, 1),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }))
}

/// Monthly profile of `column`, keyed by the month of `date_debut`
pub fn seasonal_analysis(table: &Table, column: &str) -> Result<Option<SeasonalAnalysis>> {
    let all_values = match numeric_values(table, column)? {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };
    if !table.has_column("date_debut") {
        return Err(SurveillanceError::Analysis(
            "seasonal analysis needs a date_debut column".to_string(),
        ));
    }

    let mut by_month: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for record in table.records() {
        let month = record.get("date_debut").and_then(Cell::as_date).map(|d| d.month());
        let value = record.get(column).and_then(Cell::as_f64);
        if let (Some(month), Some(value)) = (month, value) {
            let entry = by_month.entry(month).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    if by_month.is_empty() {
        return Ok(None);
    }

    let monthly_means: BTreeMap<u32, f64> = by_month
        .into_iter()
        .map(|(month, (sum, count))| (month, sum / count as f64))
        .collect();

    // first month wins ties, in calendar order
    let mut peak = (0, f64::NEG_INFINITY);
    let mut trough = (0, f64::INFINITY);
    for (&month, &m) in &monthly_means {
        if m > peak.1 {
            peak = (month, m);
        }
        if m < trough.1 {
            trough = (month, m);
        }
    }

    let overall = mean(&all_values);
    let seasonal_index = if overall > 0.0 {
        monthly_means
            .iter()
            .map(|(&month, &m)| (month, m / overall * 100.0))
            .collect()
    } else {
        BTreeMap::new()
    };

    Ok(Some(SeasonalAnalysis {
        peak_month: peak.0,
        trough_month: trough.0,
        amplitude: peak.1 - trough.1,
        monthly_means,
        seasonal_index,
    }))
}

/// Next value of `column` as the mean of the last [`FORECAST_WINDOW`] values,
/// with a 95% interval from their standard error
pub fn forecast_next_week(table: &Table, column: &str) -> Result<Option<Forecast>> {
    let values = match numeric_values(table, column)? {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };
    let recent = &values[values.len().saturating_sub(FORECAST_WINDOW)..];
    let prediction = mean(recent);
    let std_error = std_dev(recent, 0) / (recent.len() as f64).sqrt();

    Ok(Some(Forecast {
        prediction,
        lower: prediction - 1.96 * std_error,
        upper: prediction + 1.96 * std_error,
        method: "moving_average",
        values_used: recent.len(),
    }))
}

/// Period totals and rates from a time series table
pub fn epidemic_rates(table: &Table) -> Result<Option<EpidemicRates>> {
    if table.is_empty() {
        return Ok(None);
    }
    let mut totals = [0.0; 4];
    for (total, &column) in totals.iter_mut().zip(ANOMALY_COLUMNS) {
        *total = numeric_values(table, column)?
            .ok_or_else(|| SurveillanceError::Analysis(format!("missing column {:?}", column)))?
            .iter()
            .sum();
    }
    let [cases, positives, hospitalized, deaths] = totals;
    let rate = |part: f64| if cases > 0.0 { part / cases * 100.0 } else { 0.0 };

    Ok(Some(EpidemicRates {
        total_cases: cases,
        total_positives: positives,
        total_hospitalized: hospitalized,
        total_deaths: deaths,
        positivity_rate: rate(positives),
        hospitalization_rate: rate(hospitalized),
        lethality_rate: rate(deaths),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series(counts: &[i64]) -> Table {
        let records: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                json!({
                    "date_debut": format!("2024-{:02}-01", i % 12 + 1),
                    "total_cas": c,
                    "cas_positifs": c / 2,
                    "hospitalisations": c / 10,
                    "deces": 0
                })
            })
            .collect();
        Table::from_records(&records, &[])
    }

    #[test]
    fn test_zscore_flags_spike() {
        let table = series(&[10, 11, 9, 10, 12, 10, 11, 95, 10, 9]);
        let out = detect_anomalies(&table, AnomalyMethod::ZScore).unwrap();
        let flags: Vec<bool> = out
            .column("total_cas_anomaly")
            .unwrap()
            .into_iter()
            .map(|c| c.as_bool().unwrap())
            .collect();
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        assert!(flags[7]);
        // constant column never flags
        assert!(out
            .column("deces_anomaly")
            .unwrap()
            .iter()
            .all(|c| c.as_bool() == Some(false)));
    }

    #[test]
    fn test_iqr_flags_outliers() {
        let table = series(&[1, 2, 3, 4, 100]);
        let out = detect_anomalies(&table, AnomalyMethod::Iqr).unwrap();
        let cells = out.column("total_cas_anomaly").unwrap();
        assert_eq!(cells[4], &Cell::Boolean(true));
        assert_eq!(cells[2], &Cell::Boolean(false));
    }

    #[test]
    fn test_anomalies_on_empty_table() {
        let out = detect_anomalies(&Table::default(), AnomalyMethod::ZScore).unwrap();
        assert!(out.is_empty());
        assert!("isolation".parse::<AnomalyMethod>().is_err());
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.25), 1.75);
        assert_eq!(quantile(&sorted, 0.75), 3.25);
        assert_eq!(quantile(&[5.0], 0.5), 5.0);
    }

    #[test]
    fn test_trend() {
        let table = series(&[2, 4, 6, 8]);
        let trend = trend_analysis(&table, "total_cas").unwrap().unwrap();
        assert!((trend.slope - 2.0).abs() < 1e-9);
        assert!((trend.intercept - 2.0).abs() < 1e-9);
        assert!((trend.correlation.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert_eq!(trend.mean, 5.0);
        assert_eq!((trend.min, trend.max), (2.0, 8.0));

        let flat = trend_analysis(&series(&[3, 3, 3]), "total_cas").unwrap().unwrap();
        assert_eq!(flat.direction, TrendDirection::Stable);
        assert_eq!(flat.correlation, None);

        assert!(trend_analysis(&series(&[3]), "total_cas").unwrap().is_none());
        assert!(trend_analysis(&series(&[3, 4]), "absent").unwrap().is_none());
    }

    #[test]
    fn test_non_numeric_column_is_an_error() {
        let table = Table::from_records(&[json!({"total_cas": "many"}), json!({"total_cas": "few"})], &[]);
        assert!(matches!(
            trend_analysis(&table, "total_cas"),
            Err(SurveillanceError::Analysis(_))
        ));
    }

    #[test]
    fn test_seasonal() {
        let records = vec![
            json!({"date_debut": "2023-01-02", "total_cas": 10}),
            json!({"date_debut": "2023-01-09", "total_cas": 20}),
            json!({"date_debut": "2023-07-03", "total_cas": 60}),
            json!({"date_debut": "2023-10-02", "total_cas": 5}),
        ];
        let table = Table::from_records(&records, &[]);
        let s = seasonal_analysis(&table, "total_cas").unwrap().unwrap();
        assert_eq!(s.peak_month, 7);
        assert_eq!(s.trough_month, 10);
        assert_eq!(s.amplitude, 55.0);
        assert_eq!(s.monthly_means[&1], 15.0);
        // overall mean is 23.75
        assert!((s.seasonal_index[&7] - 60.0 / 23.75 * 100.0).abs() < 1e-9);

        let undated = Table::from_records(&[json!({"total_cas": 1})], &[]);
        assert!(seasonal_analysis(&undated, "total_cas").is_err());
    }

    #[test]
    fn test_forecast() {
        let f = forecast_next_week(&series(&[100, 2, 4, 6, 8]), "total_cas").unwrap().unwrap();
        assert_eq!(f.values_used, 4);
        assert_eq!(f.prediction, 5.0);
        let half_width = 1.96 * 5f64.sqrt() / 2.0;
        assert!((f.upper - (5.0 + half_width)).abs() < 1e-9);
        assert!((f.lower - (5.0 - half_width)).abs() < 1e-9);
        assert_eq!(f.method, "moving_average");

        assert!(forecast_next_week(&Table::default(), "total_cas").unwrap().is_none());
    }

    #[test]
    fn test_rates() {
        let records = vec![
            json!({"total_cas": 80, "cas_positifs": 20, "hospitalisations": 8, "deces": 1}),
            json!({"total_cas": 20, "cas_positifs": 10, "hospitalisations": 2, "deces": 1}),
        ];
        let rates = epidemic_rates(&Table::from_records(&records, &[])).unwrap().unwrap();
        assert_eq!(rates.total_cases, 100.0);
        assert_eq!(rates.positivity_rate, 30.0);
        assert_eq!(rates.hospitalization_rate, 10.0);
        assert_eq!(rates.lethality_rate, 2.0);

        let zero = vec![json!({"total_cas": 0, "cas_positifs": 0, "hospitalisations": 0, "deces": 0})];
        let rates = epidemic_rates(&Table::from_records(&zero, &[])).unwrap().unwrap();
        assert_eq!(rates.positivity_rate, 0.0);

        assert!(epidemic_rates(&Table::default()).unwrap().is_none());
        assert!(epidemic_rates(&Table::from_records(&[json!({"total_cas": 3})], &[])).is_err());
    }
}
