//! Descriptive summary of a case table: coverage, per-column statistics and
//! completeness.

use crate::analytics::{mean, quantile, std_dev};
use crate::table::{Cell, ColumnType, Table};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Most frequent values kept per categorical column
pub const TOP_VALUES: usize = 5;

/// Date column the coverage period is read from
const COVERAGE_COLUMN: &str = "date_consultation";

/// First and last consultation dates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoveragePeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Days between `start` and `end`, 0 when unknown
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quartiles {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

/// Statistics of an integer or float column, over its present values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub kind: ColumnType,
    pub missing: usize,
    pub missing_percent: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Sample standard deviation; `None` below two values
    pub std: Option<f64>,
    pub quartiles: Option<Quartiles>,
    pub unique: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Frequencies of a text, category, boolean or date column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalSummary {
    pub kind: ColumnType,
    pub missing: usize,
    pub missing_percent: f64,
    /// Most frequent value; ties go to the smallest value
    pub mode: Option<String>,
    pub unique: usize,
    /// Up to [`TOP_VALUES`] values, most frequent first
    pub distribution: Vec<ValueCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataQuality {
    pub complete_columns: Vec<String>,
    pub columns_with_missing: Vec<String>,
    /// Present cells over all cells, in percent
    pub completeness: f64,
}

/// Overview of a case table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub records: usize,
    pub regions: usize,
    pub districts: usize,
    pub period: CoveragePeriod,
    pub numeric: BTreeMap<String, NumericSummary>,
    pub categorical: BTreeMap<String, CategoricalSummary>,
    pub quality: DataQuality,
    /// Server data refresh time, when known
    pub last_update: Option<String>,
}

/// Summarize `table`. Integer and float columns get numeric statistics,
/// every other column gets value frequencies.
pub fn summarize(table: &Table) -> Summary {
    let mut summary = Summary {
        records: table.len(),
        regions: distinct_present(table, "region"),
        districts: distinct_present(table, "district"),
        period: coverage(table),
        ..Summary::default()
    };
    if table.is_empty() {
        return summary;
    }

    let rows = table.len();
    let mut missing_cells = 0usize;
    let columns: Vec<(String, ColumnType)> = table
        .column_names()
        .filter_map(|name| table.column_type(name).map(|kind| (name.to_string(), kind)))
        .collect();

    for (name, kind) in columns {
        let cells = table.column(&name).unwrap_or_default();
        let missing = cells.iter().filter(|c| c.is_missing()).count();
        let missing_percent = missing as f64 / rows as f64 * 100.0;
        missing_cells += missing;

        if missing == 0 {
            summary.quality.complete_columns.push(name.clone());
        } else {
            summary.quality.columns_with_missing.push(name.clone());
        }

        match kind {
            ColumnType::Integer | ColumnType::Float => {
                let values: Vec<f64> = cells.iter().filter_map(|c| c.as_f64()).collect();
                summary.numeric.insert(
                    name,
                    numeric_summary(kind, &values, missing, missing_percent),
                );
            }
            _ => {
                summary.categorical.insert(
                    name,
                    categorical_summary(kind, &cells, missing, missing_percent),
                );
            }
        }
    }

    let total_cells = rows * (summary.numeric.len() + summary.categorical.len());
    if total_cells > 0 {
        summary.quality.completeness =
            (total_cells - missing_cells) as f64 / total_cells as f64 * 100.0;
    }
    summary
}

/// Refresh time from a `/api/derniere-mise-a-jour` body, if the server found one
pub fn last_update_from_body(body: &Map<String, Value>) -> Option<String> {
    if body.get("statut").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    match body.get("derniere_mise_a_jour")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn numeric_summary(kind: ColumnType, values: &[f64], missing: usize, missing_percent: f64) -> NumericSummary {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let unique = sorted.iter().map(|v| v.to_bits()).collect::<BTreeSet<_>>().len();
    let quartiles = (!sorted.is_empty()).then(|| Quartiles {
        q1: quantile(&sorted, 0.25),
        q2: quantile(&sorted, 0.5),
        q3: quantile(&sorted, 0.75),
    });

    NumericSummary {
        kind,
        missing,
        missing_percent,
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        mean: (!sorted.is_empty()).then(|| mean(&sorted)),
        std: Some(std_dev(&sorted, 1)).filter(|s| s.is_finite()),
        quartiles,
        unique,
    }
}

fn categorical_summary(
    kind: ColumnType,
    cells: &[&Cell],
    missing: usize,
    missing_percent: f64,
) -> CategoricalSummary {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for cell in cells.iter().filter(|c| !c.is_missing()) {
        *counts.entry(cell.to_string()).or_insert(0) += 1;
    }

    let mut ranked: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));

    CategoricalSummary {
        kind,
        missing,
        missing_percent,
        mode: ranked.first().map(|v| v.value.clone()),
        unique: ranked.len(),
        distribution: ranked.into_iter().take(TOP_VALUES).collect(),
    }
}

fn distinct_present(table: &Table, column: &str) -> usize {
    table
        .column(column)
        .map(|cells| {
            cells
                .iter()
                .filter(|c| !c.is_missing())
                .map(|c| c.to_string())
                .collect::<BTreeSet<_>>()
                .len()
        })
        .unwrap_or(0)
}

fn coverage(table: &Table) -> CoveragePeriod {
    let dates: Vec<NaiveDate> = table
        .column(COVERAGE_COLUMN)
        .map(|cells| cells.into_iter().filter_map(Cell::as_date).collect())
        .unwrap_or_default();
    match (dates.iter().min(), dates.iter().max()) {
        (Some(&start), Some(&end)) => CoveragePeriod {
            start: Some(start),
            end: Some(end),
            days: (end - start).num_days(),
        },
        _ => CoveragePeriod::default(),
    }
}
