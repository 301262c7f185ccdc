//! Server-rendered exports and local saving of tables.

use crate::alerts::AlertQuery;
use crate::data::{check_range, format_date, CaseQuery};
use crate::error::{Result, SurveillanceError};
use crate::request::RequestSpec;
use crate::response::ExpectedKind;
use crate::rest::ApiClient;
use crate::table::Table;
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// File format of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
    Pdf,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Csv,
        ExportFormat::Json,
        ExportFormat::Xlsx,
        ExportFormat::Pdf,
    ];

    /// Name used in the `format` query parameter, also the file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = SurveillanceError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| {
                SurveillanceError::validation(
                    format!("unsupported export format {:?}, expected csv, json, xlsx or pdf", s),
                    Some("format"),
                )
            })
    }
}

/// Downloads exports and writes them to disk
#[derive(Debug, Clone, Copy)]
pub struct DataExporter<'a> {
    client: &'a ApiClient,
}

impl<'a> DataExporter<'a> {
    /// Exporter borrowing `client`
    pub fn new(client: &'a ApiClient) -> Self {
        DataExporter { client }
    }

    /// Supported formats
    pub fn formats(&self) -> &'static [ExportFormat] {
        &ExportFormat::ALL
    }

    /// Case data rendered in `format`
    pub fn export_data(&self, format: ExportFormat, query: &CaseQuery) -> Result<Vec<u8>> {
        query.validate()?;
        let spec = query
            .apply(RequestSpec::get("/export-data", ExpectedKind::Raw))
            .query("format", format.as_str());
        self.download(spec, "data", format)
    }

    /// Alert logs rendered by the server in `format`
    pub fn export_alerts(&self, format: ExportFormat, query: &AlertQuery) -> Result<Vec<u8>> {
        let bytes = self.client.alerts().export(format, query)?;
        log::info!("exported alerts as {} ({} bytes)", format, bytes.len());
        Ok(bytes)
    }

    /// Analysis report for a period
    pub fn export_report(
        &self,
        format: ExportFormat,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<u8>> {
        self.download(period_spec("/export-rapport", format, start, end)?, "report", format)
    }

    /// Case data after server-side corrections
    pub fn export_corrected(
        &self,
        format: ExportFormat,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<u8>> {
        self.download(
            period_spec("/export-corrected", format, start, end)?,
            "corrected data",
            format,
        )
    }

    fn download(&self, spec: RequestSpec, what: &str, format: ExportFormat) -> Result<Vec<u8>> {
        let bytes = self.client.request(spec)?.into_bytes()?;
        log::info!("exported {} as {} ({} bytes)", what, format, bytes.len());
        Ok(bytes)
    }

    /// JSON export of case data, as a table
    pub fn export_to_table(&self, query: &CaseQuery) -> Result<Table> {
        let bytes = self.export_data(ExportFormat::Json, query)?;
        table_from_json_export(&bytes)
    }

    /// Write export bytes to `path`, replacing any existing file
    pub fn save_bytes(&self, bytes: &[u8], path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, bytes)?;
        log::info!("saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Export case data and save it; returns the number of bytes written
    pub fn export_and_save(
        &self,
        path: impl AsRef<Path>,
        format: ExportFormat,
        query: &CaseQuery,
    ) -> Result<usize> {
        let bytes = self.export_data(format, query)?;
        self.save_bytes(&bytes, path)?;
        Ok(bytes.len())
    }

    /// See [`validate_export_data`]
    pub fn validate_export_data(&self, bytes: &[u8], format: ExportFormat) -> bool {
        validate_export_data(bytes, format)
    }

    /// See [`save_table`]
    pub fn save_table(&self, table: &Table, path: impl AsRef<Path>, format: ExportFormat) -> Result<()> {
        save_table(table, path, format)
    }
}

fn period_spec(
    path: &str,
    format: ExportFormat,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<RequestSpec> {
    check_range(start, end)?;
    Ok(RequestSpec::get(path, ExpectedKind::Raw)
        .query("format", format.as_str())
        .query_opt("date_debut", start.map(format_date))
        .query_opt("date_fin", end.map(format_date)))
}

/// Parse a JSON export: a record list, a `{"data": [...]}` wrapper, or a single record
pub fn table_from_json_export(bytes: &[u8]) -> Result<Table> {
    let value: Value = serde_json::from_slice(bytes)?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("data".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        other => {
            return Err(SurveillanceError::validation(
                format!("JSON export is neither a record list nor a record: {}", other),
                None,
            ))
        }
    };
    Ok(Table::from_records(&records, &[]))
}

/// Cheap sanity check that `bytes` look like a file of `format`
pub fn validate_export_data(bytes: &[u8], format: ExportFormat) -> bool {
    let valid = match format {
        ExportFormat::Json => serde_json::from_slice::<Value>(bytes).is_ok(),
        ExportFormat::Csv => std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.lines().next())
            .map_or(false, |header| !header.trim().is_empty()),
        ExportFormat::Xlsx => bytes.starts_with(b"PK\x03\x04"),
        ExportFormat::Pdf => bytes.starts_with(b"%PDF"),
    };
    if !valid {
        log::warn!("export data does not look like {}", format);
    }
    valid
}

/// Write a table to `path` as CSV or as a JSON array of records
pub fn save_table(table: &Table, path: impl AsRef<Path>, format: ExportFormat) -> Result<()> {
    let path = path.as_ref();
    let bytes = match format {
        ExportFormat::Csv => table.to_csv().into_bytes(),
        ExportFormat::Json => serde_json::to_vec_pretty(table)?,
        other => {
            return Err(SurveillanceError::validation(
                format!("tables can only be saved as csv or json, not {}", other),
                Some("format"),
            ))
        }
    };
    std::fs::write(path, bytes)?;
    log::info!("saved {} rows to {}", table.len(), path.display());
    Ok(())
}
